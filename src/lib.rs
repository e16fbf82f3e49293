//! # pdf-sanitizer
//!
//! Neutralise active content in user-uploaded PDFs before they leave the
//! process.
//!
//! Every page of a PDF bound for a marked upload field is rasterised, JPEG
//! encoded, and re-assembled into a brand-new document. JavaScript, forms,
//! annotations and embedded files cannot survive a trip through pixels, so
//! the reconstruction is inert. The transform is best-effort and fail-open:
//! a file is never rejected, the worst case is the original being uploaded
//! with a warning in the log.
//!
//! ## Pipeline Overview
//!
//! ```text
//!  file input ──change──▶ TriggerBinder ─┐
//!                                        ├─▶ SingleFlight ──▶ Pipeline ──▶ result
//!  fetch / xhr ──send──▶ TransportInterceptor ─┘      (once per file)    │
//!                                                                        ▼
//!                                             decode ─▶ raster ─▶ JPEG ─▶ PDF
//!                                             (pdfium)  (per page, in order)  (lopdf)
//! ```
//!
//! Both trigger paths may race on the same file; [`cache::SingleFlight`]
//! guarantees one pipeline run and one shared result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_sanitizer::{Pipeline, SanitizeOptions, SanitizerConfig, UploadFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SanitizerConfig::builder().scale(1.5).quality(0.85).build()?;
//!     let pipeline = Pipeline::new(config);
//!     let file = UploadFile::from_path("invoice.pdf").await?;
//!     let result = pipeline.sanitize(&file, &SanitizeOptions::default()).await;
//!     println!("{} -> {:?}", result.file.name(), result.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | The `pdf-sanitize` binary (clap, anyhow, indicatif) |

/// Emit a tracing event only when the `log_errors` toggle is on.
macro_rules! log_gated {
    ($enabled:expr, $level:ident, $($arg:tt)+) => {
        if $enabled {
            tracing::$level!($($arg)+);
        }
    };
}

// ── Modules ──────────────────────────────────────────────────────────────

pub mod binder;
pub mod cache;
pub mod config;
pub mod dom;
pub mod error;
pub mod file;
pub mod interceptor;
pub mod pipeline;
pub mod plugin;
pub mod presenter;
pub mod progress;
pub mod service;
mod sync;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use binder::{ChangeDisposition, GuardState, TriggerBinder};
pub use cache::SingleFlight;
pub use config::{SanitizerConfig, SanitizerConfigBuilder};
pub use dom::{Document, NodeId, Page};
pub use error::{ConfigError, InterceptError, SanitizeError, TransportError};
pub use file::{FileId, UploadFile, PDF_MEDIA_TYPE};
pub use interceptor::{
    FetchTransport, FormValue, MultipartForm, RequestBody, SendDisposition, TransportInterceptor,
    TransportResponse, TransportSlots, UploadRequest, XhrTransport,
};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer, RasterDocument};
pub use pipeline::{Outcome, Pipeline, SanitizationResult, SanitizeOptions};
pub use plugin::{Attachment, PdfSanitizer};
pub use presenter::{AnchorResolver, ClassChainResolver, PresentationContext, ProgressPresenter};
pub use progress::{ProgressCallback, SanitizeProgress};
pub use service::SanitizeService;
