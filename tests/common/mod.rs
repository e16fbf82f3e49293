//! Shared fixtures for the integration tests.
//!
//! [`FakeRasterizer`] stands in for pdfium: any buffer starting with `%PDF`
//! "decodes" into a document with the configured page sizes, and each page
//! renders to a solid image of `size × scale` pixels.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, Rgb, RgbImage};
use pdf_sanitizer::{
    FetchTransport, PageRasterizer, RasterDocument, SanitizeError, SanitizeProgress,
    SanitizerConfig, SendDisposition, TransportError, TransportResponse, UploadFile,
    UploadRequest, XhrTransport, PDF_MEDIA_TYPE,
};
use pdf_sanitizer::interceptor::SendCallback;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ── Rasterizer ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRasterizer {
    /// Page sizes in points.
    pages: Vec<(u32, u32)>,
    render_fail_at: Option<usize>,
    empty_at: Option<usize>,
    delay: Duration,
    decodes: AtomicUsize,
    rendered: Mutex<Vec<usize>>,
}

impl FakeRasterizer {
    pub fn with_pages(pages: &[(u32, u32)]) -> Self {
        Self {
            pages: pages.to_vec(),
            ..Default::default()
        }
    }

    /// `n` pages with distinct widths (100, 110, 120, ...) so order is visible.
    pub fn numbered(n: usize) -> Self {
        let pages: Vec<(u32, u32)> = (0..n as u32).map(|i| (100 + 10 * i, 140)).collect();
        Self::with_pages(&pages)
    }

    /// Rendering page `page` (1-indexed) fails.
    pub fn failing_at(mut self, page: usize) -> Self {
        self.render_fail_at = Some(page);
        self
    }

    /// Page `page` (1-indexed) renders to an empty bitmap.
    pub fn empty_at(mut self, page: usize) -> Self {
        self.empty_at = Some(page);
        self
    }

    /// Block the decode for `delay`, to widen race windows.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// 1-indexed pages rendered so far, in order.
    pub fn rendered(&self) -> Vec<usize> {
        self.rendered.lock().unwrap().clone()
    }
}

impl PageRasterizer for FakeRasterizer {
    fn decode(
        &self,
        bytes: &[u8],
        visit: &mut dyn FnMut(&mut dyn RasterDocument) -> Result<(), SanitizeError>,
    ) -> Result<(), SanitizeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if !bytes.starts_with(b"%PDF") {
            return Err(SanitizeError::DecodeFailure {
                detail: "missing %PDF header".into(),
            });
        }
        let mut doc = FakeDocument { fake: self };
        visit(&mut doc)
    }
}

struct FakeDocument<'a> {
    fake: &'a FakeRasterizer,
}

impl RasterDocument for FakeDocument<'_> {
    fn page_count(&self) -> usize {
        self.fake.pages.len()
    }

    fn render_page(&mut self, index: usize, scale: f32) -> Result<DynamicImage, SanitizeError> {
        let page = index + 1;
        if self.fake.render_fail_at == Some(page) {
            return Err(SanitizeError::RenderFailure {
                page,
                detail: "synthetic render failure".into(),
            });
        }
        self.fake.rendered.lock().unwrap().push(page);
        if self.fake.empty_at == Some(page) {
            return Ok(DynamicImage::ImageRgb8(RgbImage::new(0, 0)));
        }
        let (w, h) = self.fake.pages[index];
        let w = (w as f32 * scale).round() as u32;
        let h = (h as f32 * scale).round() as u32;
        let shade = (page * 40 % 256) as u8;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([shade, shade, 255]))))
    }
}

// ── Files and config ─────────────────────────────────────────────────────────

pub fn pdf_file(name: &str) -> UploadFile {
    UploadFile::new(name, PDF_MEDIA_TYPE, b"%PDF-1.7\n% synthetic\n".to_vec())
}

pub fn png_file(name: &str) -> UploadFile {
    UploadFile::new(name, "image/png", vec![0x89, b'P', b'N', b'G'])
}

pub fn config() -> SanitizerConfig {
    SanitizerConfig::builder().scale(1.0).quality(0.8).build().unwrap()
}

// ── Progress recorder ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    pub started: Mutex<Option<usize>>,
    pub pages: Mutex<Vec<(usize, usize, String)>>,
    pub finished: Mutex<Option<bool>>,
}

impl SanitizeProgress for RecordingProgress {
    fn on_start(&self, total_pages: usize) {
        *self.started.lock().unwrap() = Some(total_pages);
    }

    fn on_page(&self, current: usize, total: usize, message: &str) {
        self.pages
            .lock()
            .unwrap()
            .push((current, total, message.to_string()));
    }

    fn on_finish(&self, sanitized: bool) {
        *self.finished.lock().unwrap() = Some(sanitized);
    }
}

// ── Transports ───────────────────────────────────────────────────────────────

fn ok_response() -> TransportResponse {
    TransportResponse {
        status: 200,
        body: Bytes::from_static(b"{}"),
    }
}

/// Records every request it is asked to send.
#[derive(Default)]
pub struct RecordingFetch {
    pub requests: Mutex<Vec<UploadRequest>>,
}

#[async_trait]
impl FetchTransport for RecordingFetch {
    async fn fetch(&self, request: UploadRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        Ok(ok_response())
    }
}

#[derive(Default)]
pub struct RecordingXhr {
    pub requests: Mutex<Vec<UploadRequest>>,
}

impl XhrTransport for RecordingXhr {
    fn send(&self, request: UploadRequest, on_done: SendCallback) -> SendDisposition {
        self.requests.lock().unwrap().push(request);
        on_done(Ok(ok_response()));
        SendDisposition::Sent
    }
}

// ── Output inspection ────────────────────────────────────────────────────────

/// Width of the `Im0` image on each page, in page order.
pub fn image_widths(pdf: &[u8]) -> Vec<i64> {
    let doc = lopdf::Document::load_mem(pdf).expect("output must be a loadable PDF");
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let page = doc.get_dictionary(page_id).unwrap();
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
            let image_id = xobjects.get(b"Im0").unwrap().as_reference().unwrap();
            let stream = doc.get_object(image_id).unwrap().as_stream().unwrap();
            stream.dict.get(b"Width").unwrap().as_i64().unwrap()
        })
        .collect()
}

/// MediaBox width and height of each page, in points.
pub fn media_boxes(pdf: &[u8]) -> Vec<(f32, f32)> {
    let doc = lopdf::Document::load_mem(pdf).expect("output must be a loadable PDF");
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let page = doc.get_dictionary(page_id).unwrap();
            let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
            let num = |o: &lopdf::Object| match o {
                lopdf::Object::Integer(i) => *i as f32,
                lopdf::Object::Real(r) => *r as f32,
                other => panic!("unexpected MediaBox entry {other:?}"),
            };
            (num(&mb[2]), num(&mb[3]))
        })
        .collect()
}
