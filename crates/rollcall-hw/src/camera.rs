//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use image::GrayImage;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no usable frame after {attempts} attempts ({dark} dark)")]
    NoUsableFrame { attempts: usize, dark: usize },
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// Motion JPEG (one JPEG per buffer, common on USB webcams).
    Mjpeg,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }
}

/// Frame-acquisition tuning.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Frames discarded at the start of every stream (AGC/AE settling).
    pub warmup_frames: usize,
    /// Frames read before giving up on finding a non-dark one.
    pub max_attempts: usize,
    /// Upper bound on each buffer dequeue. A stalled device errors out
    /// instead of parking the capture thread.
    pub frame_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            warmup_frames: 4,
            max_attempts: 10,
            frame_timeout: Duration::from_secs(2),
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    settings: CaptureSettings,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, settings: CaptureSettings) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, MJPG, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
            settings,
        })
    }

    /// Capture one usable frame: discard warm-up frames, then return the
    /// first non-dark frame within `max_attempts`.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(
                |e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")),
            )?;
        stream.set_timeout(self.settings.frame_timeout);

        for _ in 0..self.settings.warmup_frames {
            if let Err(e) = stream.next() {
                tracing::debug!(error = %e, "warm-up frame dequeue failed");
            }
        }

        let mut dark = 0usize;
        for _ in 0..self.settings.max_attempts.max(1) {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let format = self.pixel_format;
            let image = self.to_grayscale(buf).map_err(|e| {
                CameraError::CaptureFailed(format!("{format:?} conversion failed: {e}"))
            })?;
            let frame = Frame::new(image, meta.sequence);

            if frame.is_dark {
                dark += 1;
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }
            return Ok(frame);
        }

        Err(CameraError::NoUsableFrame {
            attempts: self.settings.max_attempts.max(1),
            dark,
        })
    }

    /// Convert a raw buffer to grayscale based on the negotiated format.
    fn to_grayscale(&self, buf: &[u8]) -> Result<GrayImage, FrameError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_grayscale(buf, self.width, self.height),
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::decode_to_grayscale(buf),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}
