//! Frame sources: where an attendance pass gets its picture from.

use crate::camera::{Camera, CameraError};
use crate::frame::{self, Frame};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt image {path}: {reason}")]
    CorruptImage { path: PathBuf, reason: String },
}

impl From<CameraError> for CaptureError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::DeviceNotFound(_)
            | CameraError::DeviceBusy
            | CameraError::StreamingNotSupported
            | CameraError::FormatNegotiationFailed(_) => {
                CaptureError::CameraUnavailable(err.to_string())
            }
            CameraError::CaptureFailed(_) | CameraError::NoUsableFrame { .. } => {
                CaptureError::CaptureFailed(err.to_string())
            }
        }
    }
}

/// Produces one frame per call. Implementations may block.
pub trait FrameSource {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    fn acquire(&mut self) -> Result<Frame, CaptureError>;
}

impl FrameSource for Camera {
    fn describe(&self) -> String {
        format!("camera {}", self.device_path)
    }

    fn acquire(&mut self) -> Result<Frame, CaptureError> {
        Ok(self.capture_frame()?)
    }
}

/// An uploaded still image used in place of a live camera frame.
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for Snapshot {
    fn describe(&self) -> String {
        format!("snapshot {}", self.path.display())
    }

    fn acquire(&mut self) -> Result<Frame, CaptureError> {
        let bytes = std::fs::read(&self.path).map_err(|source| CaptureError::Io {
            path: self.path.clone(),
            source,
        })?;
        let image = frame::decode_to_grayscale(&bytes).map_err(|e| CaptureError::CorruptImage {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(
            path = %self.path.display(),
            width = image.width(),
            height = image.height(),
            "loaded snapshot"
        );
        Ok(Frame::new(image, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn test_snapshot_loads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        GrayImage::from_pixel(8, 6, Luma([150])).save(&path).unwrap();

        let mut source = Snapshot::new(&path);
        let frame = source.acquire().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert!(!frame.is_dark);
        assert!(source.describe().contains("frame.png"));
    }

    #[test]
    fn test_snapshot_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Snapshot::new(dir.path().join("nope.jpg"));
        assert!(matches!(source.acquire(), Err(CaptureError::Io { .. })));
    }

    #[test]
    fn test_snapshot_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        let mut source = Snapshot::new(&path);
        assert!(matches!(source.acquire(), Err(CaptureError::CorruptImage { .. })));
    }

    #[test]
    fn test_camera_errors_classify() {
        let unavailable: CaptureError = CameraError::DeviceBusy.into();
        assert!(matches!(unavailable, CaptureError::CameraUnavailable(_)));

        let failed: CaptureError = CameraError::NoUsableFrame { attempts: 3, dark: 3 }.into();
        assert!(matches!(failed, CaptureError::CaptureFailed(_)));
    }
}
