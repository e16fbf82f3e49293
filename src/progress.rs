//! Progress-callback trait for per-page sanitization events.
//!
//! Inject an [`Arc<dyn SanitizeProgress>`] through
//! [`crate::pipeline::SanitizeOptions::progress`] to follow a file through
//! the pipeline. Callbacks are invoked from the blocking render thread, so
//! implementations must be `Send + Sync`. All methods default to no-ops.
//!
//! # Example
//!
//! ```rust
//! use pdf_sanitizer::progress::{from_fn, ProgressCallback};
//!
//! let cb: ProgressCallback = from_fn(|current, total, message| {
//!     eprintln!("{current}/{total}: {message}");
//! });
//! ```

use std::sync::Arc;

/// Called by the pipeline as it rebuilds a document.
pub trait SanitizeProgress: Send + Sync {
    /// Called once after decoding, before the first page is rendered.
    fn on_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after page `current` (1-indexed) has been added to the output.
    fn on_page(&self, current: usize, total: usize, message: &str) {
        let _ = (current, total, message);
    }

    /// Called once with whether a reconstruction was produced.
    fn on_finish(&self, sanitized: bool) {
        let _ = sanitized;
    }
}

/// A no-op implementation.
pub struct NoopProgress;

impl SanitizeProgress for NoopProgress {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn SanitizeProgress>;

/// Adapts a `(current, total, message)` closure into a [`ProgressCallback`].
pub fn from_fn<F>(f: F) -> ProgressCallback
where
    F: Fn(usize, usize, &str) + Send + Sync + 'static,
{
    Arc::new(FnProgress(f))
}

struct FnProgress<F>(F);

impl<F> SanitizeProgress for FnProgress<F>
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn on_page(&self, current: usize, total: usize, message: &str) {
        (self.0)(current, total, message)
    }
}

/// Percentage of `current` out of `total`, rounded.
pub fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgress;
        cb.on_start(3);
        cb.on_page(1, 3, "Processing page 1 of 3...");
        cb.on_finish(true);
    }

    #[test]
    fn closure_receives_page_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = from_fn(move |current, total, _msg| sink.lock().unwrap().push((current, total)));
        cb.on_start(2);
        cb.on_page(1, 2, "a");
        cb.on_page(2, 2, "b");
        cb.on_finish(true);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn percent_rounds() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 0);
    }
}
