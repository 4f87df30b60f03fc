//! [`PageSource`] over pdfium: text runs, image draws and document metadata.
//!
//! ## Threading
//!
//! pdfium keeps thread-local state and every call blocks, so everything in
//! this module runs inside `tokio::task::spawn_blocking`. A [`PdfiumSource`]
//! borrows its [`Pdfium`] binding and the PDF bytes; it never leaves the
//! blocking closure that created it.
//!
//! ## Image identity
//!
//! pdfium does not expose XObject resource names. Draws are therefore named
//! by a digest of their decoded pixels, which gives the same property the
//! extractor needs: repeated draws of one image collapse to one record.

use crate::error::{PageError, ScribeError};
use crate::output::DocumentMetadata;
use crate::pipeline::input::PdfBytes;
use crate::pipeline::source::{
    ImageOperator, ImageSource, PageContent, PageSource, PixelBuffer, PixelLayout, TextRun,
    Transform,
};
use image::DynamicImage;
use md5::{Digest, Md5};
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Environment variable naming a directory that contains libpdfium.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to libpdfium: `$PDFIUM_LIB_PATH`, then the working directory, then
/// the system library path.
pub fn bind_pdfium() -> Result<Pdfium, ScribeError> {
    let dir = std::env::var(PDFIUM_LIB_PATH_ENV).unwrap_or_else(|_| "./".to_string());

    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ScribeError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Open a document from memory, mapping pdfium's errors to [`ScribeError`].
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf: &'a PdfBytes,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, ScribeError> {
    pdfium
        .load_pdf_from_byte_slice(&pdf.bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    ScribeError::WrongPassword {
                        source_name: pdf.source_name.clone(),
                    }
                } else {
                    ScribeError::PasswordRequired {
                        source_name: pdf.source_name.clone(),
                    }
                }
            } else {
                ScribeError::CorruptPdf {
                    source_name: pdf.source_name.clone(),
                    detail: err_str,
                }
            }
        })
}

/// A loaded pdfium document walked page by page.
pub struct PdfiumSource<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumSource<'a> {
    pub fn new(document: PdfDocument<'a>) -> Self {
        info!("PDF loaded: {} pages", document.pages().len());
        Self { document }
    }

    /// Document information dictionary plus page count and version.
    pub fn metadata(&self) -> DocumentMetadata {
        let metadata = self.document.metadata();

        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().trim().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        DocumentMetadata {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
            modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
            page_count: self.page_count(),
            pdf_version: format!("{:?}", self.document.version()),
        }
    }
}

impl PageSource for PdfiumSource<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn load_page(&self, index: usize) -> Result<PageContent, PageError> {
        let page_num = index + 1;
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| PageError::LoadFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let mut content = PageContent {
            page_num,
            height: page.height().value,
            ..Default::default()
        };

        for (sequence, object) in page.objects().iter().enumerate() {
            if let Some(text_obj) = object.as_text_object() {
                let text = text_obj.text();
                if text.is_empty() {
                    continue;
                }
                let size = text_obj.unscaled_font_size().value;
                let transform = object
                    .matrix()
                    .map(|m| {
                        Transform([
                            m.a() * size,
                            m.b() * size,
                            m.c() * size,
                            m.d() * size,
                            m.e(),
                            m.f(),
                        ])
                    })
                    .unwrap_or(Transform([size, 0.0, 0.0, size, 0.0, 0.0]));
                content.text_runs.push(TextRun::new(
                    text,
                    transform,
                    text_obj.font().name(),
                    sequence,
                ));
            } else if let Some(image_obj) = object.as_image_object() {
                let transform = object
                    .matrix()
                    .ok()
                    .map(|m| Transform([m.a(), m.b(), m.c(), m.d(), m.e(), m.f()]));
                let decoded = image_obj
                    .get_raw_image()
                    .map_err(|e| format!("{:?}", e))
                    .map(to_pixel_buffer);
                let source = match &decoded {
                    Ok(pixels) => ImageSource::Named(pixel_digest(pixels)),
                    Err(_) => ImageSource::Inline,
                };
                content
                    .images
                    .push(ImageOperator::new(source, transform, sequence, decoded));
            }
        }

        if content.text_runs.is_empty() && content.images.is_empty() {
            warn!("Page {}: no text or image objects", page_num);
        }
        debug!(
            "Page {}: {} text runs, {} images",
            page_num,
            content.text_runs.len(),
            content.images.len()
        );
        Ok(content)
    }
}

/// Keep RGB and RGBA as-is; everything else is normalised to RGBA.
fn to_pixel_buffer(image: DynamicImage) -> PixelBuffer {
    let (width, height) = (image.width(), image.height());
    match image {
        DynamicImage::ImageRgb8(rgb) => PixelBuffer {
            width,
            height,
            layout: PixelLayout::Rgb,
            data: rgb.into_raw(),
        },
        other => PixelBuffer {
            width,
            height,
            layout: PixelLayout::Rgba,
            data: other.into_rgba8().into_raw(),
        },
    }
}

fn pixel_digest(pixels: &PixelBuffer) -> String {
    let mut hasher = Md5::new();
    hasher.update(pixels.width.to_le_bytes());
    hasher.update(pixels.height.to_le_bytes());
    hasher.update(&pixels.data);
    format!("xobj-{}", hex::encode(hasher.finalize()))
}
