//! Image encoding: `DynamicImage` → base64 bytes in the upload's own format.
//!
//! The MIME type is derived from the original file name so a PNG scan stays
//! a lossless PNG and a phone JPEG is not inflated into a PNG several times
//! its size. Unknown or missing extensions fall back to JPEG.

use crate::error::AttendanceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A sheet image ready for the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    /// Standard-alphabet base64, no line breaks.
    pub data: String,
}

/// Format implied by the file name's extension, JPEG when undeterminable.
pub fn format_for_file_name(file_name: &str) -> ImageFormat {
    Path::new(file_name)
        .extension()
        .and_then(ImageFormat::from_extension)
        .unwrap_or(ImageFormat::Jpeg)
}

/// MIME type for the file name, `image/jpeg` when undeterminable.
pub fn mime_for_file_name(file_name: &str) -> &'static str {
    format_for_file_name(file_name).to_mime_type()
}

/// Re-encode `img` in the format implied by `file_name` and base64 it.
///
/// # Errors
/// [`AttendanceError::ImageEncoding`] if the encoder rejects the image or
/// produces no bytes.
pub fn encode_image(img: &DynamicImage, file_name: &str) -> Result<EncodedImage, AttendanceError> {
    let format = format_for_file_name(file_name);
    let ext = format.extensions_str().first().copied().unwrap_or("jpg");
    let encoding_error = |detail: String| AttendanceError::ImageEncoding {
        format: format!(".{ext}"),
        detail,
    };

    let mut buf = Vec::new();
    let write_result = if format == ImageFormat::Jpeg {
        jpeg_compatible(img).write_to(&mut Cursor::new(&mut buf), format)
    } else {
        img.write_to(&mut Cursor::new(&mut buf), format)
    };
    write_result.map_err(|e| encoding_error(e.to_string()))?;

    if buf.is_empty() {
        return Err(encoding_error("encoder produced no output".into()));
    }

    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image as {} → {} bytes base64",
        img.width(),
        img.height(),
        format.to_mime_type(),
        data.len()
    );

    Ok(EncodedImage {
        mime_type: format.to_mime_type().to_string(),
        data,
    })
}

/// JPEG has no alpha channel and no 16-bit mode.
fn jpeg_compatible(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img.clone(),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
