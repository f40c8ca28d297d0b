//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the ArcFace reference positions and
//! warps the face into a canonical 112×112 crop.

use image::{GrayImage, Luma};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit from `src` to `dst` (centroids + cross terms).
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut var = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            var += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }

        if var < 1e-12 {
            // Degenerate landmarks: fall back to a pure translation.
            return Self { a: 1.0, b: 0.0, tx: mdx - msx, ty: mdy - msy };
        }

        let a = dot / var;
        let b = cross / var;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    /// Map a destination point back into source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample; out-of-bounds pixels read as 0 (black).
fn sample(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |x: i64, y: i64| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.get_pixel(x as u32, y as u32)[0] as f32
        } else {
            0.0
        }
    };

    px(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + px(x0 + 1, y0) * fx * (1.0 - fy)
        + px(x0, y0 + 1) * (1.0 - fx) * fy
        + px(x0 + 1, y0 + 1) * fx * fy
}

/// Align a detected face to a canonical 112×112 crop for ArcFace.
pub fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);

    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let value = transform
            .invert_point(ox as f32, oy as f32)
            .map(|(sx, sy)| sample(image, sx, sy))
            .unwrap_or(0.0);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let t = Similarity::estimate(&pts, &pts);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3, "tx = {}", t.tx);
        assert!(t.ty.abs() < 1e-3, "ty = {}", t.ty);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3, "b = {}", t.b);
    }

    #[test]
    fn test_rotated_transform_maps_points() {
        // 90° rotation plus offset: (x, y) -> (-y + 200, x)
        let src = REFERENCE_LANDMARKS_112;
        let dst = src.map(|(x, y)| (-y + 200.0, x));
        let t = Similarity::estimate(&src, &dst);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let mx = t.a * sx - t.b * sy + t.tx;
            let my = t.b * sx + t.a * sy + t.ty;
            assert!((mx - dx).abs() < 1e-2 && (my - dy).abs() < 1e-2);
        }
    }

    #[test]
    fn test_align_face_output_size() {
        let image = GrayImage::from_pixel(640, 480, Luma([128]));
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.get_pixel(56, 56)[0], 128);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch on the left eye.
        let mut image = GrayImage::new(200, 200);
        for dy in 0..5u32 {
            for dx in 0..5u32 {
                image.put_pixel(78 + dx, 58 + dy, Luma([255]));
            }
        }

        let aligned = align_face(&image, &src_landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.get_pixel(x, y)[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }
}
