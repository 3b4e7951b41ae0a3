//! Image-quality probes used before recognition: scene brightness and a
//! sharpness-based liveness score.
//!
//! A flat print or a screen held up to the camera loses high-frequency
//! detail, so the variance of the Laplacian over the eye region drops.

use crate::types::BoundingBox;
use image::GrayImage;

/// Mean gray level (0.0–255.0). Empty images are 0.
pub fn brightness(image: &GrayImage) -> f32 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    (sum as f64 / pixels.len() as f64) as f32
}

/// Upper half of a face box, clamped to the image: `(x, y, width, height)`.
///
/// Returns `None` when nothing of the face lies inside the image.
pub fn upper_face_region(face: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let left = face.x.max(0.0).floor() as u32;
    let top = face.y.max(0.0).floor() as u32;
    let right = ((face.x + face.width).min(width as f32)).max(0.0).floor() as u32;
    let bottom = ((face.y + face.height / 2.0).min(height as f32)).max(0.0).floor() as u32;

    (right > left && bottom > top).then(|| (left, top, right - left, bottom - top))
}

/// Variance of the 4-neighbour Laplacian over a region of the image.
///
/// Borders use reflect-101 padding. Regions smaller than one pixel score 0.
pub fn laplacian_variance(image: &GrayImage, region: (u32, u32, u32, u32)) -> f64 {
    let (x0, y0, w, h) = region;
    if w == 0 || h == 0 {
        return 0.0;
    }

    let px = |x: i64, y: i64| -> f64 {
        let x = reflect101(x, x0 as i64, w as i64);
        let y = reflect101(y, y0 as i64, h as i64);
        image.get_pixel(x as u32, y as u32)[0] as f64
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in y0 as i64..(y0 + h) as i64 {
        for x in x0 as i64..(x0 + w) as i64 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let n = (w as f64) * (h as f64);
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Reflect `i` into `[start, start + len)` without repeating the edge pixel.
fn reflect101(i: i64, start: i64, len: i64) -> i64 {
    if len == 1 {
        return start;
    }
    let rel = i - start;
    let rel = if rel < 0 {
        -rel
    } else if rel >= len {
        2 * (len - 1) - rel
    } else {
        rel
    };
    start + rel.clamp(0, len - 1)
}
