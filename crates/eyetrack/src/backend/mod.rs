//! Pluggable numeric backend.
//!
//! Both tracking stages reach pixel kernels only through [`ImageBackend`], so
//! an accelerated implementation can replace [`CpuBackend`] without touching
//! the stage logic. All operations are pure: they read their inputs and return
//! freshly allocated outputs of the same shape.

mod cpu;

pub use cpu::CpuBackend;

use crate::error::BackendError;
use crate::frame::Frame;

/// Sobel gradient field.
#[derive(Debug, Clone)]
pub struct Gradients {
    /// Gradient magnitude `sqrt(dx^2 + dy^2)`.
    pub magnitude: Frame,
    /// Horizontal derivative (positive when intensity increases with `x`).
    pub dx: Frame,
    /// Vertical derivative (positive when intensity increases with `y`).
    pub dy: Frame,
}

impl Gradients {
    /// Mean gradient magnitude over the whole field.
    pub fn mean_magnitude(&self) -> f32 {
        let raw = self.magnitude.as_raw();
        if raw.is_empty() {
            return 0.0;
        }
        raw.iter().sum::<f32>() / raw.len() as f32
    }
}

/// One extremum of a response map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    /// Pixel position `[x, y]`.
    pub xy: [u32; 2],
    /// Response value at that pixel.
    pub value: f32,
}

/// Global minimum and maximum of a response map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrema {
    /// Smallest value (first occurrence in row-major order).
    pub min: Extremum,
    /// Largest value (first occurrence in row-major order).
    pub max: Extremum,
}

/// Primitive image operations consumed by the tracking core.
pub trait ImageBackend: Send + Sync {
    /// Separable correlation: `row_kernel` runs along `x`, then `col_kernel`
    /// along `y`. Kernels must have odd, non-zero length; borders replicate.
    fn convolve_separable(
        &self,
        image: &Frame,
        row_kernel: &[f32],
        col_kernel: &[f32],
    ) -> Result<Frame, BackendError>;

    /// 3x3 Sobel gradient, normalised so a unit ramp yields unit magnitude.
    fn sobel(&self, image: &Frame) -> Result<Gradients, BackendError>;

    /// Global minimum and maximum positions.
    fn find_local_extrema(&self, image: &Frame) -> Result<Extrema, BackendError>;

    /// Loy–Zelinsky fast radial symmetry transform averaged over `radii`.
    ///
    /// Bright radially symmetric blobs produce positive responses, dark ones
    /// negative. `alpha` is the radial strictness exponent.
    fn radial_symmetry_transform(
        &self,
        image: &Frame,
        radii: &[u32],
        alpha: f32,
    ) -> Result<Frame, BackendError>;
}
