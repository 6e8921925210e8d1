//! Image decoding: normalizes uploads into RGB pixel arrays.
//!
//! Whatever the container format (JPEG, PNG, WebP, ...) or colour type
//! (grayscale, RGBA, 16-bit), the detector and recognizer only ever see
//! 8-bit RGB in row-major order.

use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image is empty")]
    Empty,
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    ZeroSized,
    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode an in-memory image file into an RGB pixel array.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(DecodeError::ZeroSized);
    }

    tracing::debug!(width = rgb.width(), height = rgb.height(), "decoded image");
    Ok(rgb)
}

/// Decode an image file on disk into an RGB pixel array.
pub fn decode_rgb_file(path: &Path) -> Result<RgbImage, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_rgb(&bytes)
}
