//! One-call wiring of the sanitizer into a page.
//!
//! [`PdfSanitizer`] owns the shared service and both trigger paths.
//! [`PdfSanitizer::attach`] installs the transport interceptor and binds
//! the inputs already on the page; afterwards the host forwards mutations
//! and events through [`TriggerBinder::dispatch_pending`].

use crate::binder::{is_marked, TriggerBinder};
use crate::config::SanitizerConfig;
use crate::dom::{NodeId, Page};
use crate::error::{ConfigError, InterceptError};
use crate::file::UploadFile;
use crate::interceptor::{TransportInterceptor, TransportSlots};
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::{Pipeline, SanitizationResult};
use crate::presenter::TEMPLATE_ID;
use crate::service::SanitizeService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long [`PdfSanitizer::test_progress`] keeps the overlay up.
pub const TEST_PROGRESS_DURATION: Duration = Duration::from_secs(3);

/// Result of [`PdfSanitizer::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    /// `enabled` is off; nothing was installed or bound.
    Disabled,
    Attached {
        /// File inputs bound by the initial scan.
        bound_inputs: usize,
        /// `false` when another interceptor was already installed.
        interception: bool,
    },
}

pub struct PdfSanitizer {
    service: SanitizeService,
    binder: Arc<TriggerBinder>,
    interceptor: Arc<TransportInterceptor>,
}

impl PdfSanitizer {
    /// Sanitizer rendering with pdfium.
    pub fn new(config: SanitizerConfig, page: Page) -> Result<Self, ConfigError> {
        Self::from_pipeline(Pipeline::new(config), page)
    }

    pub fn with_rasterizer(
        config: SanitizerConfig,
        page: Page,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Result<Self, ConfigError> {
        Self::from_pipeline(Pipeline::with_rasterizer(config, rasterizer), page)
    }

    fn from_pipeline(pipeline: Pipeline, page: Page) -> Result<Self, ConfigError> {
        let service = SanitizeService::new(page, pipeline);
        let interceptor = Arc::new(TransportInterceptor::new(service.clone())?);
        let binder = Arc::new(TriggerBinder::new(service.clone()));
        Ok(Self {
            service,
            binder,
            interceptor,
        })
    }

    pub fn config(&self) -> &SanitizerConfig {
        self.service.pipeline().config()
    }

    pub fn service(&self) -> &SanitizeService {
        &self.service
    }

    pub fn binder(&self) -> &Arc<TriggerBinder> {
        &self.binder
    }

    pub fn interceptor(&self) -> &Arc<TransportInterceptor> {
        &self.interceptor
    }

    /// Install interception on `slots` and bind the page's file inputs.
    pub fn attach(&self, slots: &TransportSlots) -> Attachment {
        let config = self.config();
        if !config.enabled {
            info!("PDF sanitization is disabled");
            return Attachment::Disabled;
        }
        log_gated!(
            config.log_errors,
            info,
            "Initializing PDF sanitization (show_progress={}, log_errors={}, worker_location={:?})",
            config.show_progress,
            config.log_errors,
            config.worker_location
        );

        let page = self.service.page();
        if page.read(|doc| doc.element_by_id(TEMPLATE_ID).is_some()) {
            log_gated!(config.log_errors, info, "Progress indicator template found in page");
        } else {
            log_gated!(
                config.log_errors,
                warn,
                "Progress indicator template not found in page, using built-in overlay"
            );
        }

        let interception = match self.interceptor.install(slots) {
            Ok(()) => true,
            Err(InterceptError::AlreadyInstalled) => {
                warn!("Upload interception already installed, leaving transports as they are");
                false
            }
        };
        let bound_inputs = self.binder.scan(page.read(|doc| doc.root()));

        Attachment::Attached {
            bound_inputs,
            interception,
        }
    }

    /// Sanitize a file outside any field.
    pub async fn sanitize(&self, file: &UploadFile) -> SanitizationResult {
        self.service.sanitize_detached(file).await
    }

    /// Show the overlay on a file input and hide it after three seconds.
    ///
    /// The input is the file input named `input_name`, or the first marked
    /// file input. Returns `false` if no input was found or the overlay is
    /// disabled.
    pub fn test_progress(&self, input_name: Option<&str>) -> bool {
        let page = self.service.page();
        let input: Option<NodeId> = page.read(|doc| {
            let root = doc.root();
            match input_name {
                Some(name) => doc.find(root, |e| e.is_file_input() && e.name() == Some(name)),
                None => doc.find(root, |e| e.is_file_input() && is_marked(e)),
            }
        });
        let Some(input) = input else {
            warn!("No file input found to test the progress indicator on");
            return false;
        };

        let presenter = self.service.presenter();
        if presenter.show(page, input, "Test: Sanitizing PDF...").is_none() {
            warn!("Progress indicator could not be created");
            return false;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = self.service.clone();
                handle.spawn(async move {
                    tokio::time::sleep(TEST_PROGRESS_DURATION).await;
                    if let Some(removal) = service.presenter().hide(service.page(), input) {
                        let _ = removal.await;
                    }
                });
            }
            Err(_) => {
                presenter.hide(page, input);
            }
        }
        true
    }
}
