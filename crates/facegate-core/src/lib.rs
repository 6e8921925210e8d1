//! facegate-core: Face analysis for the facegate service.
//!
//! Decodes uploaded images into RGB pixel arrays, detects faces with SCRFD
//! and extracts ArcFace embeddings, both running via ONNX Runtime for CPU
//! inference. The service only depends on the [`FaceEncoder`] and
//! [`Matcher`] traits.

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod encoder;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use decode::{decode_rgb, DecodeError};
pub use encoder::{EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use types::{BoundingBox, CosineMatcher, Embedding, Matcher};

/// Default directory holding `det_10g.onnx` and `w600k_r50.onnx`.
///
/// `$XDG_DATA_HOME/facegate/models`, or `~/.local/share/facegate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("models")
}
