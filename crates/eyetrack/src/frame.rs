//! Frame type and pixel-level helpers shared by both stages.

use image::{GrayImage, ImageBuffer, Luma};

use crate::error::BackendError;

/// Single-channel floating-point frame.
///
/// Coordinates are `[x, y]` with pixel centers at integer positions.
pub type Frame = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Convert an 8-bit grayscale image into a frame with samples in `[0, 1]`.
pub fn from_gray(img: &GrayImage) -> Frame {
    let (w, h) = img.dimensions();
    let data = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
    // Buffer length equals w * h by construction.
    Frame::from_raw(w, h, data).unwrap_or_else(|| Frame::new(w, h))
}

/// Build a frame from row-major samples.
///
/// Returns `None` when `data.len() != width * height`.
pub fn from_samples(width: u32, height: u32, data: Vec<f32>) -> Option<Frame> {
    Frame::from_raw(width, height, data)
}

/// Frame shape as `[height, width]`.
pub fn shape(frame: &Frame) -> [u32; 2] {
    let (w, h) = frame.dimensions();
    [h, w]
}

/// Reject empty frames and frames with non-finite samples.
pub fn validate(frame: &Frame) -> Result<(), BackendError> {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return Err(BackendError::EmptyImage {
            width: w,
            height: h,
        });
    }
    if let Some(idx) = frame.as_raw().iter().position(|v| !v.is_finite()) {
        return Err(BackendError::NonFiniteSample {
            x: (idx % w as usize) as u32,
            y: (idx / w as usize) as u32,
        });
    }
    Ok(())
}

/// Sample a frame at a sub-pixel position using bilinear interpolation.
///
/// Valid for `0 <= x <= w - 1` and `0 <= y <= h - 1`; returns `None` outside
/// (including NaN coordinates).
#[inline]
pub fn bilinear_checked(frame: &Frame, x: f32, y: f32) -> Option<f32> {
    let (w, h) = frame.dimensions();
    if w < 2 || h < 2 {
        return None;
    }
    if !(x >= 0.0 && y >= 0.0 && x <= (w - 1) as f32 && y <= (h - 1) as f32) {
        return None;
    }
    let x0 = (x.floor() as u32).min(w - 2);
    let y0 = (y.floor() as u32).min(h - 2);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let stride = w as usize;
    let idx00 = y0 as usize * stride + x0 as usize;
    let raw = frame.as_raw();
    let p00 = raw[idx00];
    let p10 = raw[idx00 + 1];
    let p01 = raw[idx00 + stride];
    let p11 = raw[idx00 + stride + 1];

    Some(
        (1.0 - fx) * (1.0 - fy) * p00
            + fx * (1.0 - fy) * p10
            + (1.0 - fx) * fy * p01
            + fx * fy * p11,
    )
}

/// Nearest-pixel sample over the same domain as [`bilinear_checked`].
#[inline]
pub fn nearest_checked(frame: &Frame, x: f32, y: f32) -> Option<f32> {
    let (w, h) = frame.dimensions();
    if !(x >= 0.0 && y >= 0.0 && x <= (w as f32 - 1.0) && y <= (h as f32 - 1.0)) {
        return None;
    }
    let xi = (x.round() as u32).min(w - 1);
    let yi = (y.round() as u32).min(h - 1);
    Some(frame.as_raw()[yi as usize * w as usize + xi as usize])
}

/// Block-average downsampling by an integer factor.
///
/// Output pixel `(i, j)` is the mean of the `factor x factor` cell whose
/// top-left input pixel is `(i * factor, j * factor)`; a partial trailing
/// cell is dropped. `factor <= 1` returns a copy.
pub fn downsample(frame: &Frame, factor: u32) -> Frame {
    if factor <= 1 {
        return frame.clone();
    }
    let (w, h) = frame.dimensions();
    let ow = (w / factor).max(1);
    let oh = (h / factor).max(1);
    let raw = frame.as_raw();
    let stride = w as usize;
    let mut out = vec![0.0f32; ow as usize * oh as usize];
    for oy in 0..oh {
        let y_start = oy * factor;
        let y_end = (y_start + factor).min(h);
        for ox in 0..ow {
            let x_start = ox * factor;
            let x_end = (x_start + factor).min(w);
            let mut acc = 0.0f32;
            for y in y_start..y_end {
                let row = y as usize * stride;
                for x in x_start..x_end {
                    acc += raw[row + x as usize];
                }
            }
            let n = ((y_end - y_start) * (x_end - x_start)).max(1) as f32;
            out[oy as usize * ow as usize + ox as usize] = acc / n;
        }
    }
    Frame::from_raw(ow, oh, out).unwrap_or_else(|| Frame::new(ow, oh))
}

/// Map a downsampled coordinate back to the full-resolution frame.
///
/// Inverse of [`downsample`]: cell `i` covers full-resolution pixels
/// `i * factor .. (i + 1) * factor`, so its center sits at
/// `(i + 0.5) * factor - 0.5`.
#[inline]
pub fn upsample_coord(p: [f64; 2], factor: u32) -> [f64; 2] {
    let f = factor.max(1) as f64;
    [(p[0] + 0.5) * f - 0.5, (p[1] + 0.5) * f - 0.5]
}

/// Map a full-resolution coordinate into downsampled space.
#[inline]
pub fn downsample_coord(p: [f64; 2], factor: u32) -> [f64; 2] {
    let f = factor.max(1) as f64;
    [(p[0] + 0.5) / f - 0.5, (p[1] + 0.5) / f - 0.5]
}

/// Whether `[x, y]` lies inside the frame (pixel-center convention).
#[inline]
pub fn contains(frame: &Frame, p: [f64; 2]) -> bool {
    let (w, h) = frame.dimensions();
    p[0].is_finite()
        && p[1].is_finite()
        && p[0] >= 0.0
        && p[1] >= 0.0
        && p[0] <= (w as f64 - 1.0)
        && p[1] <= (h as f64 - 1.0)
}
