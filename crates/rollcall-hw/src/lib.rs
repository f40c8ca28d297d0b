//! rollcall-hw — frame acquisition.
//!
//! V4L2 camera capture with grayscale conversion and dark-frame skipping,
//! plus still-image snapshots behind the same [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, CaptureSettings, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{CaptureError, FrameSource, Snapshot};
