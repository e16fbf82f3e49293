//! Output document assembly: JPEG pages → a fresh PDF.
//!
//! Each page is a single image XObject painted over the whole media box;
//! nothing from the source document is copied, so no catalog actions, forms,
//! annotations or embedded files can carry over.

use crate::error::SanitizeError;
use crate::pipeline::encode::EncodedPage;
use bytes::Bytes;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Millimetres per CSS pixel (96 px per inch).
pub const MM_PER_PX: f32 = 0.264583;
/// PDF points per millimetre.
pub const PT_PER_MM: f32 = 72.0 / 25.4;

/// Page size in PDF points for an image of the given pixel size.
pub fn page_size_pt(width_px: u32, height_px: u32) -> (f32, f32) {
    (
        width_px as f32 * MM_PER_PX * PT_PER_MM,
        height_px as f32 * MM_PER_PX * PT_PER_MM,
    )
}

/// Incrementally builds the reconstructed document.
pub struct PdfAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfAssembler {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Append one page showing `page` edge to edge.
    pub fn add_page(&mut self, page: &EncodedPage) -> Result<(), SanitizeError> {
        let (width_pt, height_pt) = page_size_pt(page.width_px, page.height_px);

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(page.width_px as i64),
                "Height" => Object::Integer(page.height_px as i64),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            page.jpeg.clone(),
        );
        let image_id = self.doc.add_object(image);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(width_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(height_pt),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content.encode().map_err(|e| SanitizeError::AssembleFailure {
            detail: format!("page {} content stream: {}", self.kids.len() + 1, e),
        })?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width_pt),
                Object::Real(height_pt),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    /// Serialise the document.
    pub fn finish(mut self) -> Result<Bytes, SanitizeError> {
        if self.kids.is_empty() {
            return Err(SanitizeError::AssembleFailure {
                detail: "document has no pages".into(),
            });
        }

        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => Object::Integer(count),
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        // Flate-compresses the content streams; DCTDecode images already carry a filter.
        self.doc.compress();

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| SanitizeError::AssembleFailure {
                detail: e.to_string(),
            })?;
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(width_px: u32, height_px: u32) -> EncodedPage {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width_px,
            height_px,
            image::Rgb([200, 200, 200]),
        ));
        crate::pipeline::encode::encode_jpeg(&img, 0.8).unwrap()
    }

    #[test]
    fn pixel_to_point_conversion() {
        // 96 px == 1 inch == 72 pt
        let (w, h) = page_size_pt(96, 192);
        assert!((w - 72.0).abs() < 0.01, "w = {w}");
        assert!((h - 144.0).abs() < 0.01, "h = {h}");
    }

    #[test]
    fn builds_a_loadable_multi_page_document() {
        let mut asm = PdfAssembler::new();
        asm.add_page(&page(40, 60)).unwrap();
        asm.add_page(&page(50, 30)).unwrap();
        assert_eq!(asm.page_count(), 2);

        let bytes = asm.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).expect("reload");
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn empty_document_is_an_assemble_failure() {
        let err = PdfAssembler::new().finish().unwrap_err();
        assert!(matches!(err, SanitizeError::AssembleFailure { .. }));
    }
}
