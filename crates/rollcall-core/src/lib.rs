//! rollcall-core — identities, face matching, and embedding extraction.
//!
//! Face detection uses SCRFD and recognition uses ArcFace, both running via
//! ONNX Runtime on the CPU. Everything else in the workspace talks to them
//! through the [`FaceExtractor`] trait.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod intake;
pub mod recognizer;
pub mod types;

pub use extractor::{best_face, DetectedFace, ExtractError, FaceExtractor, OnnxExtractor};
pub use intake::{IntakeError, RegistrationRequest};
pub use types::{
    BoundingBox, CosineMatcher, Embedding, EuclideanMatcher, Identity, MatchMetric, MatchResult,
    Matcher, StudentRecord,
};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`
/// (falling back to `~/.local/share/rollcall/models`).
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
