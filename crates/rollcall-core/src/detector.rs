//! SCRFD face detector via ONNX Runtime.
//!
//! 3-stride anchor-free decoding with letterboxed input and NMS post-processing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox placement of the source frame inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    new_w: u32,
    new_h: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, input as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, input as u32);
        Self {
            scale,
            new_w,
            new_h,
            pad_x: (input as u32 - new_w) / 2,
            pad_y: (input as u32 - new_h) / 2,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces in a grayscale image, sorted by confidence (highest first).
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };

            candidates.extend(decode_stride(
                tensor(score_idx, "scores")?,
                tensor(bbox_idx, "bboxes")?,
                tensor(kps_idx, "kps")?,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        // nms() returns detections in descending confidence order.
        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox the image into a normalized NCHW tensor (gray replicated to 3 channels).
fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let lb = Letterbox::fit(image.width(), image.height(), SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image, lb.new_w, lb.new_h, FilterType::Triangle);

    // Padding uses the mean so it normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let v = (pixel[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = ((x + lb.pad_x) as usize, (y + lb.pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    (tensor, lb)
}

/// Discover output tensor ordering by name (`score_8`, `bbox_16`, ...).
///
/// Falls back to the standard positional layout
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]` when names are generic.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let b = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - b[0] * s, ay - b[1] * s);
            let (x2, y2) = letterbox.unmap(ax + b[2] * s, ay + b[3] * s);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Non-Maximum Suppression, result sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}
