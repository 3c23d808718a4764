//! Scalar CPU implementation of the backend contract.

use super::{Extrema, Extremum, Gradients, ImageBackend};
use crate::error::BackendError;
use crate::frame::{self, Frame};

const SOBEL_DERIV: [f32; 3] = [-0.5, 0.0, 0.5];
const SOBEL_SMOOTH: [f32; 3] = [0.25, 0.5, 0.25];

/// Straightforward single-threaded kernels.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    /// Pixels whose gradient magnitude is at or below this fraction of the
    /// frame maximum cast no radial-symmetry votes.
    pub gradient_floor: f32,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            gradient_floor: 0.01,
        }
    }
}

impl CpuBackend {
    /// Backend with an explicit voting floor.
    pub fn with_gradient_floor(gradient_floor: f32) -> Self {
        Self {
            gradient_floor: gradient_floor.clamp(0.0, 1.0),
        }
    }
}

fn check_kernel(kernel: &[f32], axis: &'static str) -> Result<(), BackendError> {
    if kernel.is_empty() || kernel.len() % 2 == 0 {
        return Err(BackendError::InvalidKernel {
            axis,
            len: kernel.len(),
        });
    }
    Ok(())
}

fn to_frame(w: u32, h: u32, data: Vec<f32>) -> Frame {
    Frame::from_raw(w, h, data).unwrap_or_else(|| Frame::new(w, h))
}

impl ImageBackend for CpuBackend {
    fn convolve_separable(
        &self,
        image: &Frame,
        row_kernel: &[f32],
        col_kernel: &[f32],
    ) -> Result<Frame, BackendError> {
        frame::validate(image)?;
        check_kernel(row_kernel, "row")?;
        check_kernel(col_kernel, "column")?;
        // Correlation, borders padded by replication.
        Ok(imageproc::filter::separable_filter(image, row_kernel, col_kernel))
    }

    fn sobel(&self, image: &Frame) -> Result<Gradients, BackendError> {
        let dx = self.convolve_separable(image, &SOBEL_DERIV, &SOBEL_SMOOTH)?;
        let dy = self.convolve_separable(image, &SOBEL_SMOOTH, &SOBEL_DERIV)?;
        let (w, h) = image.dimensions();
        let magnitude: Vec<f32> = dx
            .as_raw()
            .iter()
            .zip(dy.as_raw())
            .map(|(&gx, &gy)| (gx * gx + gy * gy).sqrt())
            .collect();
        Ok(Gradients {
            magnitude: to_frame(w, h, magnitude),
            dx,
            dy,
        })
    }

    fn find_local_extrema(&self, image: &Frame) -> Result<Extrema, BackendError> {
        frame::validate(image)?;
        let w = image.width() as usize;
        let raw = image.as_raw();
        let (mut min_i, mut max_i) = (0usize, 0usize);
        for (i, &v) in raw.iter().enumerate() {
            if v < raw[min_i] {
                min_i = i;
            }
            if v > raw[max_i] {
                max_i = i;
            }
        }
        let at = |i: usize| Extremum {
            xy: [(i % w) as u32, (i / w) as u32],
            value: raw[i],
        };
        Ok(Extrema {
            min: at(min_i),
            max: at(max_i),
        })
    }

    fn radial_symmetry_transform(
        &self,
        image: &Frame,
        radii: &[u32],
        alpha: f32,
    ) -> Result<Frame, BackendError> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(BackendError::InvalidAlpha(alpha));
        }
        let radii: Vec<u32> = radii.iter().copied().filter(|&r| r > 0).collect();
        if radii.is_empty() {
            return Err(BackendError::InvalidRadii);
        }
        let grad = self.sobel(image)?;
        let (w, h) = image.dimensions();
        let (wu, hu) = (w as usize, h as usize);
        let n = wu * hu;

        let mag = grad.magnitude.as_raw();
        let gx = grad.dx.as_raw();
        let gy = grad.dy.as_raw();
        let max_mag = mag.iter().copied().fold(0.0f32, f32::max);
        let mut acc = vec![0.0f32; n];
        if max_mag <= f32::EPSILON {
            return Ok(to_frame(w, h, acc));
        }
        let floor = self.gradient_floor * max_mag;

        let mut orientation = vec![0.0f32; n];
        let mut magnitude = vec![0.0f32; n];
        let x_max = (wu - 1) as f32;
        let y_max = (hu - 1) as f32;

        for &radius in &radii {
            orientation.fill(0.0);
            magnitude.fill(0.0);
            let r = radius as f32;

            for y in 0..hu {
                let yf = y as f32;
                for x in 0..wu {
                    let idx = y * wu + x;
                    let m = mag[idx];
                    if m <= floor {
                        continue;
                    }
                    let ux = gx[idx] / m;
                    let uy = gy[idx] / m;
                    let xf = x as f32;

                    let px = (xf + r * ux).round().clamp(0.0, x_max) as usize;
                    let py = (yf + r * uy).round().clamp(0.0, y_max) as usize;
                    let pos = py * wu + px;
                    orientation[pos] += 1.0;
                    magnitude[pos] += m;

                    let nx = (xf - r * ux).round().clamp(0.0, x_max) as usize;
                    let ny = (yf - r * uy).round().clamp(0.0, y_max) as usize;
                    let neg = ny * wu + nx;
                    orientation[neg] -= 1.0;
                    magnitude[neg] -= m;
                }
            }

            // Loy & Zelinsky normalisation constants.
            let kappa = if radius == 1 { 8.0 } else { 9.9 };
            let f: Vec<f32> = orientation
                .iter()
                .zip(&magnitude)
                .map(|(&o, &m)| {
                    let o_norm = o.abs().min(kappa) / kappa;
                    m / kappa * o_norm.powf(alpha)
                })
                .collect();

            let smoothed = imageproc::filter::gaussian_blur_f32(&to_frame(w, h, f), 0.25 * r);
            for (a, s) in acc.iter_mut().zip(smoothed.as_raw()) {
                *a += s;
            }
        }

        let inv = 1.0 / radii.len() as f32;
        for v in &mut acc {
            *v *= inv;
        }
        tracing::trace!(radii = ?radii, alpha, "radial symmetry transform");
        Ok(to_frame(w, h, acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn disk_frame(w: u32, h: u32, c: [f32; 2], r: f32, fg: f32, bg: f32) -> Frame {
        Frame::from_fn(w, h, |x, y| {
            let dx = x as f32 - c[0];
            let dy = y as f32 - c[1];
            Luma([if dx * dx + dy * dy <= r * r { fg } else { bg }])
        })
    }

    #[test]
    fn convolve_identity_kernel_is_noop() {
        let f = disk_frame(16, 12, [8.0, 6.0], 3.0, 1.0, 0.0);
        let out = CpuBackend::default()
            .convolve_separable(&f, &[1.0], &[0.0, 1.0, 0.0])
            .unwrap();
        assert_eq!(out.as_raw(), f.as_raw());
    }

    #[test]
    fn convolve_replicates_borders() {
        let f = Frame::from_fn(6, 4, |x, y| Luma([(x + 10 * y) as f32]));
        let third = 1.0 / 3.0;
        let out = CpuBackend::default()
            .convolve_separable(&f, &[third, third, third], &[0.0, 0.0, 1.0])
            .unwrap();
        // Rows shift up by one, the last row repeats.
        assert!((out.get_pixel(0, 0)[0] - (10.0 + 10.0 + 11.0) / 3.0).abs() < 1e-5);
        assert!((out.get_pixel(3, 1)[0] - 23.0).abs() < 1e-5);
        assert!((out.get_pixel(5, 3)[0] - (34.0 + 35.0 + 35.0) / 3.0).abs() < 1e-5);
    }

    #[test]
    fn sobel_sign_follows_intensity() {
        let f = Frame::from_fn(10, 10, |x, y| Luma([(2 * y) as f32 - x as f32]));
        let g = CpuBackend::default().sobel(&f).unwrap();
        assert!((g.dx.get_pixel(4, 4)[0] + 1.0).abs() < 1e-6);
        assert!((g.dy.get_pixel(4, 4)[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn convolve_rejects_even_kernels() {
        let f = Frame::new(4, 4);
        let err = CpuBackend::default()
            .convolve_separable(&f, &[0.5, 0.5], &[1.0])
            .unwrap_err();
        assert_eq!(err, BackendError::InvalidKernel { axis: "row", len: 2 });
    }

    #[test]
    fn sobel_of_unit_ramp_has_unit_magnitude() {
        let f = Frame::from_fn(10, 10, |x, _| Luma([x as f32]));
        let g = CpuBackend::default().sobel(&f).unwrap();
        assert!((g.dx.get_pixel(5, 5)[0] - 1.0).abs() < 1e-6);
        assert!(g.dy.get_pixel(5, 5)[0].abs() < 1e-6);
        assert!((g.magnitude.get_pixel(5, 5)[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn extrema_report_first_positions() {
        let mut f = Frame::new(5, 4);
        f.put_pixel(3, 1, Luma([2.0]));
        f.put_pixel(1, 2, Luma([-1.0]));
        let e = CpuBackend::default().find_local_extrema(&f).unwrap();
        assert_eq!(e.max.xy, [3, 1]);
        assert_eq!(e.min.xy, [1, 2]);
        assert_eq!(e.min.value, -1.0);
    }

    #[test]
    fn rst_bright_disk_peaks_positive_at_center() {
        let f = disk_frame(48, 48, [24.0, 20.0], 6.0, 1.0, 0.0);
        let s = CpuBackend::default()
            .radial_symmetry_transform(&f, &[4, 5, 6, 7], 2.0)
            .unwrap();
        let e = CpuBackend::default().find_local_extrema(&s).unwrap();
        assert!(e.max.value > 0.0);
        assert!((e.max.xy[0] as i32 - 24).abs() <= 1, "{:?}", e.max);
        assert!((e.max.xy[1] as i32 - 20).abs() <= 1, "{:?}", e.max);
        assert!(e.max.value > 10.0 * e.min.value.abs());
    }

    #[test]
    fn rst_dark_disk_peaks_negative_at_center() {
        let f = disk_frame(48, 48, [20.0, 26.0], 7.0, 0.1, 0.8);
        let s = CpuBackend::default()
            .radial_symmetry_transform(&f, &[5, 6, 7, 8], 2.0)
            .unwrap();
        let e = CpuBackend::default().find_local_extrema(&s).unwrap();
        assert!(e.min.value < 0.0);
        assert!((e.min.xy[0] as i32 - 20).abs() <= 1, "{:?}", e.min);
        assert!((e.min.xy[1] as i32 - 26).abs() <= 1, "{:?}", e.min);
    }

    #[test]
    fn rst_blank_frame_is_zero() {
        let f = Frame::from_pixel(20, 20, Luma([0.5]));
        let s = CpuBackend::default()
            .radial_symmetry_transform(&f, &[2, 3], 10.0)
            .unwrap();
        assert!(s.as_raw().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rst_rejects_bad_arguments() {
        let f = Frame::new(8, 8);
        let b = CpuBackend::default();
        assert_eq!(
            b.radial_symmetry_transform(&f, &[0], 2.0).unwrap_err(),
            BackendError::InvalidRadii
        );
        assert!(matches!(
            b.radial_symmetry_transform(&f, &[2], f32::NAN),
            Err(BackendError::InvalidAlpha(_))
        ));
        assert!(matches!(
            b.radial_symmetry_transform(&Frame::new(0, 0), &[2], 2.0),
            Err(BackendError::EmptyImage { .. })
        ));
    }
}
