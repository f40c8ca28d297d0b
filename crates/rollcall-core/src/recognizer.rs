//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional, L2-normalized embeddings from aligned face crops
//! using the w600k_r50 model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download w600k_r50.onnx from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract the embedding of one detected face.
    pub fn extract(
        &mut self,
        image: &GrayImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// 112×112 aligned crop → normalized NCHW tensor, gray replicated to 3 channels.
fn preprocess(aligned: &GrayImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in aligned.enumerate_pixels() {
        if x as usize >= size || y as usize >= size {
            continue;
        }
        let v = (pixel[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = GrayImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Luma([128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_and_channels() {
        let aligned = GrayImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Luma([100]));
        let tensor = preprocess(&aligned);
        let expected = (100.0 - ARCFACE_MEAN) / ARCFACE_STD;
        for (y, x) in [(0, 0), (50, 60), (111, 111)] {
            for c in 0..3 {
                assert!((tensor[[0, c, y, x]] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
