//! The sanitization pipeline: PDF bytes in, rebuilt PDF (or the original) out.
//!
//! ## Data Flow
//!
//! ```text
//! file ──▶ gate ──▶ render ──▶ encode ──▶ assemble ──▶ new file
//!        (type/size) (pdfium)   (JPEG)     (lopdf)
//! ```
//!
//! 1. gate: non-PDFs and oversized files leave untouched
//! 2. [`render`]: decode and rasterise each page in order; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]: JPEG-encode each rendered page
//! 4. [`assemble`]: place every JPEG as a full-page image in a new document
//!
//! [`Pipeline::sanitize`] never fails: every problem is recorded in the
//! [`Outcome`] and the original file is returned in its place.

pub mod assemble;
pub mod encode;
pub mod render;

use crate::config::{mb_to_bytes, SanitizerConfig};
use crate::error::SanitizeError;
use crate::file::{UploadFile, PDF_MEDIA_TYPE};
use crate::progress::ProgressCallback;
use assemble::PdfAssembler;
use bytes::Bytes;
use render::{PageRasterizer, PdfiumRasterizer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Per-call overrides of the shared configuration.
#[derive(Clone, Default)]
pub struct SanitizeOptions {
    pub scale: Option<f32>,
    pub quality: Option<f32>,
    pub max_file_size_mb: Option<u64>,
    pub max_pages: Option<usize>,
    /// Receives page-level progress from the render thread.
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for SanitizeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanitizeOptions")
            .field("scale", &self.scale)
            .field("quality", &self.quality)
            .field("max_file_size_mb", &self.max_file_size_mb)
            .field("max_pages", &self.max_pages)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl SanitizeOptions {
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// What happened to a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// A reconstruction with this many pages replaced the original.
    Sanitized { pages: usize },
    /// Not a PDF; passed through.
    NotApplicable,
    /// A configured limit was exceeded; passed through.
    Skipped(SanitizeError),
    /// A stage failed; the original is used instead.
    Failed(SanitizeError),
    /// The file is itself the output of an earlier run.
    AlreadySanitized,
}

/// The file to upload plus how it was obtained.
#[derive(Debug, Clone)]
pub struct SanitizationResult {
    pub file: UploadFile,
    pub outcome: Outcome,
}

impl SanitizationResult {
    pub fn sanitized(file: UploadFile, pages: usize) -> Self {
        Self {
            file,
            outcome: Outcome::Sanitized { pages },
        }
    }

    /// The original file, with the reason it was kept.
    pub fn passthrough(file: UploadFile, outcome: Outcome) -> Self {
        Self { file, outcome }
    }

    pub fn is_sanitized(&self) -> bool {
        matches!(self.outcome, Outcome::Sanitized { .. })
    }

    pub fn into_file(self) -> UploadFile {
        self.file
    }
}

/// Effective settings for one run.
#[derive(Debug, Clone, Copy)]
struct RunSettings {
    scale: f32,
    quality: f32,
    max_file_size_mb: Option<u64>,
    max_pages: Option<usize>,
}

/// Runs files through decode → rasterise → encode → assemble.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<SanitizerConfig>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl Pipeline {
    /// A pipeline rendering with pdfium, located as `config.worker_location` says.
    pub fn new(config: SanitizerConfig) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::from_config(&config));
        Self::with_rasterizer(config, rasterizer)
    }

    pub fn with_rasterizer(config: SanitizerConfig, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            config: Arc::new(config),
            rasterizer,
        }
    }

    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    fn settings(&self, options: &SanitizeOptions) -> RunSettings {
        RunSettings {
            scale: options.scale.unwrap_or(self.config.scale),
            quality: options.quality.unwrap_or(self.config.quality),
            max_file_size_mb: options
                .max_file_size_mb
                .or(self.config.max_file_size_mb)
                .filter(|&mb| mb > 0),
            max_pages: options
                .max_pages
                .or(self.config.max_pages)
                .filter(|&p| p > 0),
        }
    }

    /// Sanitize one file. Never fails; see [`Outcome`].
    pub async fn sanitize(
        &self,
        file: &UploadFile,
        options: &SanitizeOptions,
    ) -> SanitizationResult {
        let log = self.config.log_errors;

        if !file.is_pdf() {
            log_gated!(
                log,
                debug,
                "'{}' is not a PDF ({}), passing through",
                file.name(),
                file.media_type()
            );
            return SanitizationResult::passthrough(file.clone(), Outcome::NotApplicable);
        }

        let settings = self.settings(options);
        let start = Instant::now();
        log_gated!(log, info, "Sanitizing '{}' ({} bytes)", file.name(), file.size());

        let rebuilt = match settings.max_file_size_mb {
            Some(limit_mb) if file.size() > mb_to_bytes(limit_mb) => {
                Err(SanitizeError::SizeExceeded {
                    size: file.size(),
                    limit_mb,
                })
            }
            _ => {
                let rasterizer = Arc::clone(&self.rasterizer);
                let bytes = file.bytes().clone();
                let progress = options.progress.clone();
                tokio::task::spawn_blocking(move || {
                    rebuild_blocking(rasterizer.as_ref(), &bytes, settings, progress.as_ref())
                })
                .await
                .unwrap_or_else(|e| {
                    Err(SanitizeError::Internal(format!("sanitize task failed: {e}")))
                })
            }
        };

        let result = match rebuilt {
            Ok((bytes, pages)) => {
                let out = UploadFile::new(file.name(), PDF_MEDIA_TYPE, bytes);
                log_gated!(
                    log,
                    info,
                    "Sanitized '{}': {} pages, {} → {} bytes in {}ms",
                    file.name(),
                    pages,
                    file.size(),
                    out.size(),
                    start.elapsed().as_millis()
                );
                SanitizationResult::sanitized(out, pages)
            }
            Err(e) if e.is_policy_skip() => {
                log_gated!(log, warn, "{}", e);
                SanitizationResult::passthrough(file.clone(), Outcome::Skipped(e))
            }
            Err(e) => {
                log_gated!(
                    log,
                    error,
                    "PDF sanitization failed for '{}', using original file: {}",
                    file.name(),
                    e
                );
                SanitizationResult::passthrough(file.clone(), Outcome::Failed(e))
            }
        };

        if let Some(progress) = &options.progress {
            progress.on_finish(result.is_sanitized());
        }
        result
    }
}

/// Decode, rasterise, encode and assemble on the calling (blocking) thread.
fn rebuild_blocking(
    rasterizer: &dyn PageRasterizer,
    bytes: &[u8],
    settings: RunSettings,
    progress: Option<&ProgressCallback>,
) -> Result<(Bytes, usize), SanitizeError> {
    let mut assembler = PdfAssembler::new();
    let mut total = 0;

    rasterizer.decode(bytes, &mut |doc| {
        total = doc.page_count();
        if total == 0 {
            return Err(SanitizeError::DecodeFailure {
                detail: "document has no pages".into(),
            });
        }
        if let Some(limit) = settings.max_pages {
            if total > limit {
                return Err(SanitizeError::PageCountExceeded { pages: total, limit });
            }
        }
        if let Some(p) = progress {
            p.on_start(total);
        }

        for index in 0..total {
            let page_no = index + 1;
            let image = doc.render_page(index, settings.scale)?;
            let encoded = encode::encode_jpeg(&image, settings.quality).map_err(|e| {
                SanitizeError::EncodeFailure {
                    page: page_no,
                    detail: e.to_string(),
                }
            })?;
            assembler.add_page(&encoded)?;

            if let Some(p) = progress {
                p.on_page(page_no, total, &format!("Processing page {page_no} of {total}..."));
            }
        }
        Ok(())
    })?;

    let bytes = assembler.finish()?;
    Ok((bytes, total))
}
