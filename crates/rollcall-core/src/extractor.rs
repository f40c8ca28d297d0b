//! Embedding extraction: image in, zero or more (face, embedding) pairs out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// One face found in an image together with its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Anything that can turn an image into face embeddings.
///
/// An empty result means no face was found; that is not an error.
pub trait FaceExtractor {
    fn extract_faces(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError>;
}

/// Highest-confidence face; the earliest one wins ties.
pub fn best_face(faces: Vec<DetectedFace>) -> Option<DetectedFace> {
    faces.into_iter().fold(None, |best, face| match best {
        Some(b) if b.bbox.confidence >= face.bbox.confidence => Some(b),
        _ => Some(face),
    })
}

/// SCRFD detection followed by ArcFace embedding of every detected face.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceExtractor for OnnxExtractor {
    fn extract_faces(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let boxes = self.detector.detect(image)?;
        tracing::debug!(faces = boxes.len(), "detection done");

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(image, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }

        Ok(faces)
    }
}
