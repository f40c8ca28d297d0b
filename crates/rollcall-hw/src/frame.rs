//! Frame type and pixel conversions (YUYV, Y16, MJPEG → grayscale), dark detection.

use image::GrayImage;
use std::time::Instant;

/// Fraction of near-black pixels above which a frame is considered dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured (or loaded) grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub sequence: u32,
    pub captured_at: Instant,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        let is_dark = is_dark_frame(image.as_raw(), DARK_FRAME_THRESHOLD);
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
            is_dark,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.image.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// YUYV 4:2:2 packs two pixels per 4 bytes `[Y0, U, Y1, V]`; keep the Y bytes.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }
    let luma = yuyv[..expected].iter().step_by(2).copied().collect();
    gray_image(width, height, luma)
}

/// 16-bit little-endian grayscale, downscaled to 8 bits.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: buf.len() });
    }
    let luma = buf[..expected].chunks_exact(2).map(|px| px[1]).collect();
    gray_image(width, height, luma)
}

/// 8-bit grayscale passthrough (trims driver padding).
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: buf.len() });
    }
    gray_image(width, height, buf[..expected].to_vec())
}

/// Decode any encoded image (JPEG/PNG/MJPEG frame) to grayscale.
pub fn decode_to_grayscale(bytes: &[u8]) -> Result<GrayImage, FrameError> {
    Ok(image::load_from_memory(bytes)?.to_luma8())
}

fn gray_image(width: u32, height: u32, luma: Vec<u8>) -> Result<GrayImage, FrameError> {
    let actual = luma.len();
    GrayImage::from_raw(width, height, luma).ok_or(FrameError::InvalidLength {
        expected: (width * height) as usize,
        actual,
    })
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let gray = yuyv_to_grayscale(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(gray.as_raw(), &vec![100, 200]);
    }

    #[test]
    fn test_yuyv_to_grayscale_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray.dimensions(), (4, 2));
        assert_eq!(gray.as_raw(), &vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_grayscale(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x1234 little-endian → 0x12
        let gray = y16_to_grayscale(&[0x34, 0x12, 0xff, 0xab], 2, 1).unwrap();
        assert_eq!(gray.as_raw(), &vec![0x12, 0xab]);
    }

    #[test]
    fn test_grey_trims_padding() {
        let gray = grey_to_grayscale(&[1, 2, 3, 4, 99, 99], 2, 2).unwrap();
        assert_eq!(gray.as_raw(), &vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_png_roundtrip() {
        let img = GrayImage::from_pixel(4, 3, Luma([77]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_to_grayscale(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1)[0], 77);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            decode_to_grayscale(b"definitely not an image"),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut borderline = vec![10u8; 940];
        borderline.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&borderline, 0.95));
    }

    #[test]
    fn test_frame_brightness() {
        let frame = Frame::new(GrayImage::from_pixel(10, 10, Luma([200])), 7);
        assert!(!frame.is_dark);
        assert_eq!(frame.sequence, 7);
        assert!((frame.avg_brightness() - 200.0).abs() < 1e-3);
        assert_eq!((frame.width(), frame.height()), (10, 10));
    }
}
