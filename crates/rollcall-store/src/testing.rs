//! Test doubles: a face extractor driven by the image's pixel value.

use image::{GrayImage, ImageFormat, Luma};
use rollcall_core::{BoundingBox, DetectedFace, Embedding, ExtractError, FaceExtractor};
use std::collections::HashMap;

/// A 4×4 PNG whose every pixel is `tag`.
pub(crate) fn png_bytes(tag: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    GrayImage::from_pixel(4, 4, Luma([tag]))
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Returns the faces scripted for the image's top-left pixel value, or none.
#[derive(Default)]
pub(crate) struct ScriptedExtractor {
    faces: HashMap<u8, Vec<(f32, Vec<f32>)>>,
}

impl ScriptedExtractor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn face_for(self, tag: u8, embedding: Vec<f32>) -> Self {
        self.faces_for(tag, vec![(0.9, embedding)])
    }

    pub(crate) fn faces_for(mut self, tag: u8, faces: Vec<(f32, Vec<f32>)>) -> Self {
        self.faces.insert(tag, faces);
        self
    }
}

impl FaceExtractor for ScriptedExtractor {
    fn extract_faces(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let tag = image.get_pixel(0, 0)[0];
        Ok(self
            .faces
            .get(&tag)
            .into_iter()
            .flatten()
            .map(|(confidence, values)| DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 4.0,
                    height: 4.0,
                    confidence: *confidence,
                    landmarks: None,
                },
                embedding: Embedding::new(values.clone()),
            })
            .collect())
    }
}
