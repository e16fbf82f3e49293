//! Error types for the pdf-sanitizer library.
//!
//! The error types follow the failure domains of the crate:
//!
//! * [`SanitizeError`]: why the pipeline did not produce a reconstruction.
//!   It never escapes [`crate::pipeline::Pipeline::sanitize`]; it is
//!   recorded inside [`crate::pipeline::Outcome`] next to the original file
//!   that is used instead. Policy skips (size/page caps) and genuine failures
//!   are both represented so callers can tell them apart in logs.
//!
//! * [`ConfigError`]: the configuration could not be resolved.
//!
//! * [`TransportError`]: a real network send failed. Sanitization problems
//!   never turn into transport errors.
//!
//! * [`InterceptError`]: the transport interceptor could not be installed.

use thiserror::Error;

/// Reasons a file passed through the pipeline without being rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum SanitizeError {
    // ── Policy skips ──────────────────────────────────────────────────────
    /// The file is larger than `max_file_size_mb`.
    #[error("PDF file exceeds maximum size of {limit_mb}MB ({size} bytes)")]
    SizeExceeded { size: u64, limit_mb: u64 },

    /// The decoded document has more pages than `max_pages`.
    #[error("PDF has {pages} pages, exceeding limit of {limit}. Skipping sanitization.")]
    PageCountExceeded { pages: usize, limit: usize },

    // ── Stage failures ────────────────────────────────────────────────────
    /// The bytes could not be opened as a PDF (or the engine is unavailable).
    #[error("Failed to decode PDF: {detail}")]
    DecodeFailure { detail: String },

    /// pdfium failed to rasterise a page (1-indexed).
    #[error("Rasterisation failed for page {page}: {detail}")]
    RenderFailure { page: usize, detail: String },

    /// The rendered bitmap could not be JPEG encoded (1-indexed page).
    #[error("Image encoding failed for page {page}: {detail}")]
    EncodeFailure { page: usize, detail: String },

    /// The output document could not be built or serialised.
    #[error("Failed to assemble sanitized PDF: {detail}")]
    AssembleFailure { detail: String },

    /// Unexpected internal error (e.g. the sanitize task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SanitizeError {
    /// `true` for configured limits, which are logged as warnings rather
    /// than errors.
    pub fn is_policy_skip(&self) -> bool {
        matches!(
            self,
            SanitizeError::SizeExceeded { .. } | SanitizeError::PageCountExceeded { .. }
        )
    }
}

/// Configuration could not be resolved.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Raster scale must be a finite number greater than zero.
    #[error("Invalid scale {0}: must be a finite number > 0")]
    InvalidScale(f32),

    /// JPEG quality must lie in (0, 1].
    #[error("Invalid quality {0}: must be in (0, 1]")]
    InvalidQuality(f32),

    /// An upload URL pattern is not a valid regular expression.
    #[error("Invalid upload URL pattern '{pattern}': {detail}")]
    InvalidPattern { pattern: String, detail: String },

    /// The page-injected configuration object is not valid JSON.
    #[error("Failed to parse sanitizer configuration: {0}")]
    Parse(String),

    /// An environment variable holds a value of the wrong type.
    #[error("Environment variable {var} is invalid: {detail}")]
    Env { var: String, detail: String },
}

/// A real (un-intercepted) network send failed.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The HTTP method string is not a valid method token.
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    /// The request could not be completed.
    #[error("Request to '{url}' failed: {reason}")]
    RequestFailed { url: String, reason: String },

    /// The request was sent without calling `open` first.
    #[error("send() called before open()")]
    NotOpened,
}

/// The transport interceptor could not be installed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
    /// The network entry points are already wrapped; wrapping twice would
    /// sanitize every payload twice.
    #[error("Transport interceptor is already installed")]
    AlreadyInstalled,
}
