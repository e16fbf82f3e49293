//! The shared "sanitize this file for that field" entry point.
//!
//! Both trigger paths (the change-event binder and the transport
//! interceptor) go through [`SanitizeService::sanitize_file`]. It routes
//! the request through the [`SingleFlight`] cache, and the run that wins
//! the claim drives the progress overlay on the field it was started for.

use crate::cache::SingleFlight;
use crate::dom::{NodeId, Page};
use crate::file::UploadFile;
use crate::pipeline::{Outcome, Pipeline, SanitizationResult, SanitizeOptions};
use crate::presenter::{PresentationContext, ProgressPresenter};
use crate::progress::{percent, ProgressCallback, SanitizeProgress};
use std::sync::Arc;

const START_MESSAGE: &str = "Sanitizing PDF...";

/// Pipeline + cache + presenter, bound to one page.
#[derive(Clone)]
pub struct SanitizeService {
    page: Page,
    pipeline: Pipeline,
    cache: SingleFlight,
    presenter: Arc<ProgressPresenter>,
    log_errors: bool,
}

impl SanitizeService {
    pub fn new(page: Page, pipeline: Pipeline) -> Self {
        let config = pipeline.config();
        let log_errors = config.log_errors;
        let presenter = Arc::new(ProgressPresenter::new(config));
        Self {
            page,
            pipeline,
            cache: SingleFlight::new(log_errors),
            presenter,
            log_errors,
        }
    }

    pub fn with_presenter(mut self, presenter: ProgressPresenter) -> Self {
        self.presenter = Arc::new(presenter);
        self
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn cache(&self) -> &SingleFlight {
        &self.cache
    }

    pub fn presenter(&self) -> &ProgressPresenter {
        &self.presenter
    }

    /// Sanitize `file`, showing progress on `input` if this call starts the
    /// run. Concurrent and repeated calls for the same file share one run.
    pub async fn sanitize_file(
        &self,
        file: &UploadFile,
        input: Option<NodeId>,
    ) -> SanitizationResult {
        if !file.is_pdf() {
            return SanitizationResult::passthrough(file.clone(), Outcome::NotApplicable);
        }

        let page = self.page.clone();
        let pipeline = self.pipeline.clone();
        let presenter = Arc::clone(&self.presenter);
        let log_errors = self.log_errors;

        self.cache
            .obtain(file, move |file| async move {
                log_gated!(
                    log_errors,
                    info,
                    "Starting sanitization for file: {} ({:.2} MB)",
                    file.name(),
                    file.size() as f64 / 1024.0 / 1024.0
                );

                let ctx = input.and_then(|input| presenter.show(&page, input, START_MESSAGE));
                if input.is_some() && ctx.is_none() && presenter.is_enabled() {
                    log_gated!(log_errors, warn, "Progress indicator could not be created");
                }

                let shown = ctx.map(|ctx| ctx.input);
                let mut options = SanitizeOptions::default();
                if let Some(ctx) = ctx {
                    options.progress = Some(Arc::new(OverlayProgress {
                        page: page.clone(),
                        presenter: Arc::clone(&presenter),
                        ctx,
                    }) as ProgressCallback);
                }

                let result = pipeline.sanitize(&file, &options).await;

                if let Some(input) = shown {
                    presenter.hide(&page, input);
                }
                log_gated!(log_errors, info, "Sanitization completed for file: {}", file.name());
                result
            })
            .await
    }

    /// Sanitize without any field to report progress on.
    pub async fn sanitize_detached(&self, file: &UploadFile) -> SanitizationResult {
        self.sanitize_file(file, None).await
    }

    /// A finished result for `file`, without waiting.
    pub fn peek(&self, file: &UploadFile) -> Option<SanitizationResult> {
        if !file.is_pdf() {
            return Some(SanitizationResult::passthrough(file.clone(), Outcome::NotApplicable));
        }
        self.cache.peek(file)
    }
}

/// Mirrors page progress into the overlay.
struct OverlayProgress {
    page: Page,
    presenter: Arc<ProgressPresenter>,
    ctx: PresentationContext,
}

impl SanitizeProgress for OverlayProgress {
    fn on_page(&self, current: usize, total: usize, message: &str) {
        self.presenter
            .update(&self.page, &self.ctx, message, Some(percent(current, total)));
    }
}
