//! Face encoding: detection followed by embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns pixels into face embeddings.
///
/// Implementations may hold mutable inference state, so calls are `&mut`
/// and the encoder is expected to live on a single thread.
pub trait FaceEncoder: Send {
    /// Detect every face in `image` and return one embedding per face, most
    /// confident detection first. An empty vector means no face was found.
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError>;
}

/// SCRFD + ArcFace encoder backed by ONNX Runtime.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path, confidence_threshold: f32) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE), confidence_threshold)?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EncoderError> {
        let faces = self.detector.detect(image)?;

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            match self.recognizer.extract(image, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::warn!(confidence = face.confidence, "skipping face without landmarks");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(faces = faces.len(), embeddings = embeddings.len(), "encoded image");
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxFaceEncoder::load(dir.path(), 0.5).err().unwrap();
        assert!(matches!(
            err,
            EncoderError::Detector(DetectorError::ModelNotFound(ref p)) if p.ends_with(DETECTOR_MODEL_FILE)
        ));
    }
}
