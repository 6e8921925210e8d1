//! Deterministic stand-ins for the ONNX encoder.

use facegate_core::{EncoderError, Embedding, FaceEncoder};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const BLACK: [u8; 3] = [0, 0, 0];
pub const RED: [u8; 3] = [255, 0, 0];
pub const DARK_RED: [u8; 3] = [128, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];

/// Treats the top-left pixel colour as the face embedding; black means no face.
pub struct ColorEncoder;

impl FaceEncoder for ColorEncoder {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
        let pixel = image.get_pixel(0, 0).0;
        if pixel == BLACK {
            return Ok(Vec::new());
        }
        Ok(vec![Embedding::new(pixel.map(f32::from).to_vec())])
    }
}

/// A small solid-colour PNG.
pub fn png(color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 16, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
