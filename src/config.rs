//! Configuration for PDF sanitization.
//!
//! All tunables live in [`SanitizerConfig`], built via its
//! [`SanitizerConfigBuilder`], parsed from the JSON object a host page
//! injects ([`SanitizerConfig::from_json`]), or read from `PDF_SANITIZER_*`
//! environment variables ([`SanitizerConfig::from_env`]). The configuration
//! is resolved once and then shared read-only by every component.

use crate::error::ConfigError;
use regex::RegexSet;
use serde::{Deserialize, Deserializer, Serialize};

/// Default raster scale: 1.5 px per PDF point (108 DPI).
pub const DEFAULT_SCALE: f32 = 1.5;
/// Default JPEG quality in (0, 1].
pub const DEFAULT_QUALITY: f32 = 0.85;
/// URL fragments that identify upload endpoints by default.
pub const DEFAULT_UPLOAD_URL_PATTERNS: &[&str] = &["/livewire/upload-file", "/livewire/"];

/// Configuration for PDF sanitization.
///
/// # Example
/// ```rust
/// use pdf_sanitizer::SanitizerConfig;
///
/// let config = SanitizerConfig::builder()
///     .scale(2.0)
///     .quality(0.9)
///     .max_pages(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, Some(50));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SanitizerConfig {
    /// Master switch. When false nothing is bound or intercepted.
    #[serde(deserialize_with = "loose_bool")]
    pub enabled: bool,

    /// Location of the rendering engine (path to the pdfium shared library).
    ///
    /// Empty means: `PDFIUM_LIB_PATH` if set, otherwise the system library.
    #[serde(alias = "workerPath")]
    pub worker_location: String,

    /// Raster scale factor applied to the page size in points. Default: 1.5.
    ///
    /// Higher values give sharper text in the reconstruction at the cost of
    /// larger output files and longer render times.
    pub scale: f32,

    /// JPEG quality in (0, 1]. Default: 0.85.
    pub quality: f32,

    /// Files larger than this many MiB are passed through untouched.
    pub max_file_size_mb: Option<u64>,

    /// Documents with more pages than this are passed through untouched.
    pub max_pages: Option<usize>,

    /// Show the progress overlay on the triggering field. Default: true.
    #[serde(deserialize_with = "loose_bool")]
    pub show_progress: bool,

    /// Emit info/warn/error log lines. Default: true.
    #[serde(deserialize_with = "loose_bool")]
    pub log_errors: bool,

    /// Regular expressions matched against request URLs to recognise upload
    /// requests. Requests with a multipart body are inspected regardless.
    pub upload_url_patterns: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_location: String::new(),
            scale: DEFAULT_SCALE,
            quality: DEFAULT_QUALITY,
            max_file_size_mb: None,
            max_pages: None,
            show_progress: true,
            log_errors: true,
            upload_url_patterns: DEFAULT_UPLOAD_URL_PATTERNS
                .iter()
                .map(|p| regex::escape(p))
                .collect(),
        }
    }
}

impl SanitizerConfig {
    /// Create a new builder for `SanitizerConfig`.
    pub fn builder() -> SanitizerConfigBuilder {
        SanitizerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parse the configuration object injected into a host page.
    ///
    /// Keys are camelCase (`maxFileSizeMb`, `showProgress`, ...); missing keys
    /// take their defaults. Boolean toggles accept `true`, `"true"` and `1`
    /// because template engines often render booleans as strings or numbers.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SanitizerConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        SanitizerConfigBuilder { config }.build()
    }

    /// Resolve the configuration from `PDF_SANITIZER_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `PDF_SANITIZER_ENABLED` | `enabled` |
    /// | `PDF_SANITIZER_WORKER_LOCATION` | `worker_location` |
    /// | `PDF_SANITIZER_SCALE` | `scale` |
    /// | `PDF_SANITIZER_QUALITY` | `quality` |
    /// | `PDF_SANITIZER_MAX_FILE_SIZE_MB` | `max_file_size_mb` |
    /// | `PDF_SANITIZER_MAX_PAGES` | `max_pages` |
    /// | `PDF_SANITIZER_SHOW_PROGRESS` | `show_progress` |
    /// | `PDF_SANITIZER_LOG_ERRORS` | `log_errors` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(v) = env_var("PDF_SANITIZER_ENABLED") {
            builder = builder.enabled(is_truthy(&v));
        }
        if let Some(v) = env_var("PDF_SANITIZER_WORKER_LOCATION") {
            builder = builder.worker_location(v);
        }
        if let Some(v) = env_var("PDF_SANITIZER_SCALE") {
            builder = builder.scale(parse_env("PDF_SANITIZER_SCALE", &v)?);
        }
        if let Some(v) = env_var("PDF_SANITIZER_QUALITY") {
            builder = builder.quality(parse_env("PDF_SANITIZER_QUALITY", &v)?);
        }
        if let Some(v) = env_var("PDF_SANITIZER_MAX_FILE_SIZE_MB") {
            builder = builder.max_file_size_mb(parse_env("PDF_SANITIZER_MAX_FILE_SIZE_MB", &v)?);
        }
        if let Some(v) = env_var("PDF_SANITIZER_MAX_PAGES") {
            builder = builder.max_pages(parse_env("PDF_SANITIZER_MAX_PAGES", &v)?);
        }
        if let Some(v) = env_var("PDF_SANITIZER_SHOW_PROGRESS") {
            builder = builder.show_progress(is_truthy(&v));
        }
        if let Some(v) = env_var("PDF_SANITIZER_LOG_ERRORS") {
            builder = builder.log_errors(is_truthy(&v));
        }
        builder.build()
    }

    /// Compile the upload URL patterns.
    pub fn upload_matcher(&self) -> Result<RegexSet, ConfigError> {
        RegexSet::new(&self.upload_url_patterns).map_err(|e| ConfigError::InvalidPattern {
            pattern: self.upload_url_patterns.join(" | "),
            detail: e.to_string(),
        })
    }

    /// Size cap in bytes, if any.
    pub fn max_file_size_bytes(&self) -> Option<u64> {
        self.max_file_size_mb.map(mb_to_bytes)
    }
}

pub(crate) fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Builder for [`SanitizerConfig`].
#[derive(Debug)]
pub struct SanitizerConfigBuilder {
    config: SanitizerConfig,
}

impl SanitizerConfigBuilder {
    pub fn enabled(mut self, v: bool) -> Self {
        self.config.enabled = v;
        self
    }

    pub fn worker_location(mut self, location: impl Into<String>) -> Self {
        self.config.worker_location = location.into();
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn quality(mut self, quality: f32) -> Self {
        self.config.quality = quality;
        self
    }

    /// A limit of zero means "no limit".
    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.config.max_file_size_mb = (mb > 0).then_some(mb);
        self
    }

    /// A limit of zero means "no limit".
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.config.max_pages = (pages > 0).then_some(pages);
        self
    }

    pub fn show_progress(mut self, v: bool) -> Self {
        self.config.show_progress = v;
        self
    }

    pub fn log_errors(mut self, v: bool) -> Self {
        self.config.log_errors = v;
        self
    }

    pub fn upload_url_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.upload_url_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<SanitizerConfig, ConfigError> {
        let c = &mut self.config;
        if !c.scale.is_finite() || c.scale <= 0.0 {
            return Err(ConfigError::InvalidScale(c.scale));
        }
        if !c.quality.is_finite() || c.quality <= 0.0 || c.quality > 1.0 {
            return Err(ConfigError::InvalidQuality(c.quality));
        }
        // A zero limit arriving through JSON means "unset", as with the setters.
        c.max_file_size_mb = c.max_file_size_mb.filter(|&mb| mb > 0);
        c.max_pages = c.max_pages.filter(|&p| p > 0);
        c.upload_matcher()?;
        Ok(self.config)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => s == "true",
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    })
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: var.to_string(),
        detail: e.to_string(),
    })
}
