use image::RgbImage;
use ndarray::Array4;

use crate::{Result, SamplerErr};

/// Converts decoded pixels in `[-1, 1]` shaped `(N, 3, H, W)` into 8-bit images.
///
/// # Errors
/// Returns `SamplerErr::ShapeMismatch` if the pixels don't have 3 channels.
pub fn to_images(pixels: &Array4<f32>) -> Result<Vec<RgbImage>> {
    let (n, c, h, w) = pixels.dim();
    if c != 3 {
        return Err(SamplerErr::ShapeMismatch {
            what: "decoded images",
            got: vec![n, c, h, w],
            expected: vec![n, 3, h, w],
        });
    }

    pixels
        .outer_iter()
        .map(|sample| {
            let raw = sample
                .permuted_axes([1, 2, 0])
                .iter()
                .map(|&v| to_u8(v))
                .collect();

            RgbImage::from_raw(w as u32, h as u32, raw).ok_or_else(|| {
                SamplerErr::ShapeMismatch {
                    what: "image buffer",
                    got: vec![h, w],
                    expected: vec![h, w, 3],
                }
            })
        })
        .collect()
}

/// Maps `[-1, 1]` onto `[0, 255]`, truncating.
fn to_u8(v: f32) -> u8 {
    ((v + 1.0) / 2.0 * 255.0).clamp(0.0, 255.0) as u8
}
