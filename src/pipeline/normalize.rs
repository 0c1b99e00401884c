//! Normalization: arbitrary supported input → one canonical PNG.
//!
//! A PDF contributes its first page only — invoices are one-page documents
//! and later pages are terms-and-conditions noise. Raster inputs are decoded
//! and re-encoded so every downstream stage sees the same format regardless
//! of what the client uploaded.
//!
//! ## Why spawn_blocking for PDFs?
//!
//! pdfium wraps a C++ library with thread-local state that must not run on
//! async worker threads. `tokio::task::spawn_blocking` moves the rendering
//! onto the blocking pool so document tasks never stall the runtime.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly; capping the longest edge bounds memory regardless
//! of physical size and matches the input sweet spot of vision models
//! (1,024–2,048 px).

use std::io::Cursor;
use std::io::Write;

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

use crate::error::Doc2OrderError;

/// MIME families accepted as raster input.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/webp",
    "image/tiff",
    "image/bmp",
];

/// True when the bytes or declared type identify a PDF. Magic bytes win over
/// the declared type: browsers routinely mislabel drag-and-dropped files.
pub fn is_pdf(bytes: &[u8], content_type: &str) -> bool {
    bytes.starts_with(b"%PDF") || content_type == "application/pdf"
}

/// True when the declared type belongs to a supported raster family.
pub fn is_supported_image_type(content_type: &str) -> bool {
    SUPPORTED_IMAGE_TYPES.contains(&content_type) || content_type.starts_with("image/")
}

/// Convert uploaded bytes into a single canonical PNG.
///
/// - PDF input: first page rasterised via pdfium, longest edge capped at
///   `max_pixels`.
/// - Raster input (or mislabelled bytes that still decode): converted to RGB
///   and re-encoded as PNG.
///
/// Fails with [`Doc2OrderError::UnsupportedInput`] for anything else,
/// including corrupt files of a supported type.
pub async fn normalize_to_png(
    bytes: Vec<u8>,
    content_type: &str,
    max_pixels: u32,
) -> Result<Vec<u8>, Doc2OrderError> {
    if is_pdf(&bytes, content_type) {
        return tokio::task::spawn_blocking(move || render_pdf_first_page(&bytes, max_pixels))
            .await
            .map_err(|e| Doc2OrderError::Internal(format!("render task panicked: {e}")))?;
    }

    if is_supported_image_type(content_type) {
        return decode_raster(&bytes).map_err(|e| Doc2OrderError::UnsupportedInput {
            detail: format!("failed to process image: {e}"),
        });
    }

    // The declared type is wrong often enough that a decode attempt is
    // worth one pass before rejecting.
    decode_raster(&bytes).map_err(|_| Doc2OrderError::UnsupportedInput {
        detail: format!("content type '{content_type}' is not a PDF or supported image"),
    })
}

/// Rasterise page 1 of a PDF to PNG bytes. Blocking; call via
/// `spawn_blocking`.
fn render_pdf_first_page(bytes: &[u8], max_pixels: u32) -> Result<Vec<u8>, Doc2OrderError> {
    // pdfium wants a file path; hand it a managed temp file that disappears
    // when this function returns.
    let mut tmp = tempfile::NamedTempFile::new().map_err(|e| Doc2OrderError::Storage {
        path: std::env::temp_dir(),
        source: e,
    })?;
    tmp.write_all(bytes).map_err(|e| Doc2OrderError::Storage {
        path: tmp.path().to_path_buf(),
        source: e,
    })?;

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(tmp.path(), None)
        .map_err(|e| Doc2OrderError::UnsupportedInput {
            detail: format!("failed to process PDF: {e:?}"),
        })?;

    let pages = document.pages();
    let page = pages.get(0).map_err(|e| Doc2OrderError::UnsupportedInput {
        detail: format!("PDF has no readable first page: {e:?}"),
    })?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| Doc2OrderError::UnsupportedInput {
            detail: format!("failed to rasterise PDF page: {e:?}"),
        })?;

    let img = bitmap.as_image();
    debug!(width = img.width(), height = img.height(), "rendered PDF page 1");
    png_bytes(&img)
}

/// Decode any supported raster format and re-encode as PNG.
fn decode_raster(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    debug!(width = rgb.width(), height = rgb.height(), "decoded raster upload");
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, Doc2OrderError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| Doc2OrderError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn tiny_png() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 10, 10])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn pdf_detection_prefers_magic_bytes() {
        assert!(is_pdf(b"%PDF-1.7 rest", "application/octet-stream"));
        assert!(is_pdf(b"whatever", "application/pdf"));
        assert!(!is_pdf(b"GIF89a", "image/gif"));
    }

    #[tokio::test]
    async fn png_upload_normalizes_to_png() {
        let out = normalize_to_png(tiny_png(), "image/png", 2000).await.unwrap();
        // PNG signature
        assert_eq!(&out[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let round = image::load_from_memory(&out).unwrap();
        assert_eq!((round.width(), round.height()), (4, 4));
    }

    #[tokio::test]
    async fn mislabelled_image_still_decodes() {
        let out = normalize_to_png(tiny_png(), "application/octet-stream", 2000).await;
        assert!(out.is_ok(), "magic-byte sniffing should rescue mislabelled uploads");
    }

    #[tokio::test]
    async fn garbage_bytes_are_unsupported() {
        let err = normalize_to_png(b"not an image at all".to_vec(), "text/plain", 2000)
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2OrderError::UnsupportedInput { .. }));
    }

    #[tokio::test]
    async fn corrupt_image_of_supported_type_is_unsupported() {
        let err = normalize_to_png(b"\x89PNG but truncated".to_vec(), "image/png", 2000)
            .await
            .unwrap_err();
        match err {
            Doc2OrderError::UnsupportedInput { detail } => {
                assert!(detail.contains("image"), "got: {detail}")
            }
            other => panic!("expected UnsupportedInput, got {other:?}"),
        }
    }
}
