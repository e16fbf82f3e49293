//! PDF decoding and rasterisation.
//!
//! The pipeline only needs two capabilities from a rendering engine: open a
//! byte buffer as a page-addressable document, and render one page at a
//! given scale. [`PageRasterizer`] captures exactly that so the pipeline can
//! be driven by pdfium in production and by synthetic documents in tests.
//!
//! pdfium documents borrow the library bindings they were opened with, so
//! the document is handed to a visitor closure instead of being returned.
//! Everything here is blocking; the pipeline calls it from
//! `tokio::task::spawn_blocking`.

use crate::config::SanitizerConfig;
use crate::error::SanitizeError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// An opened, page-addressable document.
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Render page `index` (0-based) at `scale` pixels per PDF point.
    fn render_page(&mut self, index: usize, scale: f32) -> Result<DynamicImage, SanitizeError>;
}

/// Visitor receiving the opened document.
pub type DocumentVisitor<'v> =
    &'v mut dyn FnMut(&mut dyn RasterDocument) -> Result<(), SanitizeError>;

/// Decodes PDF bytes into a [`RasterDocument`].
pub trait PageRasterizer: Send + Sync {
    /// Open `bytes` and pass the document to `visit`.
    ///
    /// Returns [`SanitizeError::DecodeFailure`] when the bytes cannot be
    /// opened; errors returned by `visit` are propagated unchanged.
    fn decode(&self, bytes: &[u8], visit: DocumentVisitor<'_>) -> Result<(), SanitizeError>;
}

/// [`PageRasterizer`] backed by the pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Bind to the library at `path` on every decode.
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(path.into()),
        }
    }

    /// Use `worker_location` when set, else `PDFIUM_LIB_PATH`, else the
    /// system library.
    pub fn from_config(config: &SanitizerConfig) -> Self {
        let location = config.worker_location.trim();
        if location.is_empty() {
            Self::default()
        } else {
            Self::with_library(location)
        }
    }

    fn bind(&self) -> Result<Pdfium, SanitizeError> {
        let env_path = std::env::var("PDFIUM_LIB_PATH").ok().filter(|p| !p.is_empty());
        let (location, bindings) = match (&self.library, env_path) {
            (Some(path), _) => (path.display().to_string(), Pdfium::bind_to_library(path)),
            (None, Some(path)) => (path.clone(), Pdfium::bind_to_library(PathBuf::from(path))),
            (None, None) => ("<system>".to_string(), Pdfium::bind_to_system_library()),
        };
        let bindings = bindings.map_err(|e| SanitizeError::DecodeFailure {
            detail: format!(
                "could not bind to pdfium library at {location}: {e:?} \
                 (set worker_location or PDFIUM_LIB_PATH to a libpdfium build)"
            ),
        })?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn decode(&self, bytes: &[u8], visit: DocumentVisitor<'_>) -> Result<(), SanitizeError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| SanitizeError::DecodeFailure {
                detail: format!("{:?}", e),
            })?;
        let mut handle = PdfiumDocument { document };
        visit(&mut handle)
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&mut self, index: usize, scale: f32) -> Result<DynamicImage, SanitizeError> {
        let render_failed = |detail: String| SanitizeError::RenderFailure {
            page: index + 1,
            detail,
        };

        let page_index = u16::try_from(index)
            .map_err(|_| render_failed("page index out of range".into()))?;
        let page = self
            .document
            .pages()
            .get(page_index)
            .map_err(|e| render_failed(format!("{:?}", e)))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| render_failed(format!("{:?}", e)))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}
