//! Image encoding: rendered page → lossy JPEG.
//!
//! JPEG keeps reconstructions close to the size of typical scanned PDFs;
//! the quality knob trades text crispness against upload size. The output
//! document embeds these bytes untouched (DCTDecode), so no second
//! compression pass happens.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageError};
use tracing::debug;

/// A page ready to be placed into the output document.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub jpeg: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

/// Map a (0, 1] quality to the encoder's 1–100 scale.
pub fn quality_percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encode a rendered page as an RGB JPEG.
///
/// The alpha channel is dropped; pdfium renders onto an opaque white page.
pub fn encode_jpeg(img: &DynamicImage, quality: f32) -> Result<EncodedPage, ImageError> {
    let rgb = img.to_rgb8();
    let (width_px, height_px) = rgb.dimensions();
    if width_px == 0 || height_px == 0 {
        return Err(ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        )));
    }

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality_percent(quality));
    encoder.encode(rgb.as_raw(), width_px, height_px, ExtendedColorType::Rgb8)?;

    debug!("Encoded {}x{} page → {} bytes JPEG", width_px, height_px, jpeg.len());
    Ok(EncodedPage {
        jpeg,
        width_px,
        height_px,
    })
}
