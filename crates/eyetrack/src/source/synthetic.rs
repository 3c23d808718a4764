//! Synthetic eye renderer.

use image::Luma;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Parametric eye image: background, optional iris, pupil disk and a
/// corneal-reflection glint, with optional optical blur and sensor noise.
///
/// Disk edges are anti-aliased by supersampling so sub-pixel center shifts
/// change the rendered intensities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeScene {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Intensity outside the iris.
    pub background: f32,
    /// Iris radius around the pupil center; `None` draws no iris.
    pub iris_radius: Option<f64>,
    /// Iris intensity.
    pub iris_intensity: f32,
    /// Pupil center `[x, y]`.
    pub pupil_center: [f64; 2],
    /// Pupil radius.
    pub pupil_radius: f64,
    /// Pupil intensity.
    pub pupil_intensity: f32,
    /// Glint center `[x, y]`; `None` draws no glint.
    pub cr_center: Option<[f64; 2]>,
    /// Glint radius.
    pub cr_radius: f64,
    /// Glint intensity.
    pub cr_intensity: f32,
    /// Gaussian blur sigma applied after rasterisation (0 disables).
    pub blur_sigma: f32,
    /// Standard deviation of additive Gaussian noise (0 disables).
    pub noise_sigma: f32,
    /// Supersampling factor per axis.
    pub supersample: u32,
}

impl Default for EyeScene {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            background: 0.75,
            iris_radius: Some(70.0),
            iris_intensity: 0.45,
            pupil_center: [160.0, 120.0],
            pupil_radius: 30.0,
            pupil_intensity: 0.08,
            cr_center: Some([172.0, 110.0]),
            cr_radius: 4.0,
            cr_intensity: 1.0,
            blur_sigma: 1.0,
            noise_sigma: 0.01,
            supersample: 4,
        }
    }
}

impl EyeScene {
    /// A single disk on a flat background, no blur or noise.
    pub fn disk(
        width: u32,
        height: u32,
        center: [f64; 2],
        radius: f64,
        intensity: f32,
        background: f32,
    ) -> Self {
        Self {
            width,
            height,
            background,
            iris_radius: None,
            pupil_center: center,
            pupil_radius: radius,
            pupil_intensity: intensity,
            cr_center: None,
            blur_sigma: 0.0,
            noise_sigma: 0.0,
            ..Self::default()
        }
    }

    fn intensity_at(&self, x: f64, y: f64) -> f32 {
        let inside = |c: [f64; 2], r: f64| {
            let dx = x - c[0];
            let dy = y - c[1];
            dx * dx + dy * dy <= r * r
        };
        if let Some(c) = self.cr_center {
            if inside(c, self.cr_radius) {
                return self.cr_intensity;
            }
        }
        if inside(self.pupil_center, self.pupil_radius) {
            return self.pupil_intensity;
        }
        match self.iris_radius {
            Some(r) if inside(self.pupil_center, r) => self.iris_intensity,
            _ => self.background,
        }
    }

    /// Rasterise the scene. Noise is drawn from `rng` when one is given.
    pub fn render(&self, rng: Option<&mut StdRng>) -> Frame {
        let s = self.supersample.max(1);
        let inv = 1.0 / s as f64;
        let weight = 1.0 / (s * s) as f32;
        let mut frame = Frame::from_fn(self.width, self.height, |x, y| {
            let mut acc = 0.0f32;
            for j in 0..s {
                let sy = y as f64 + (j as f64 + 0.5) * inv - 0.5;
                for i in 0..s {
                    let sx = x as f64 + (i as f64 + 0.5) * inv - 0.5;
                    acc += self.intensity_at(sx, sy);
                }
            }
            Luma([acc * weight])
        });

        if self.blur_sigma > 0.0 && self.width > 0 && self.height > 0 {
            frame = imageproc::filter::gaussian_blur_f32(&frame, self.blur_sigma);
        }

        // A negative or non-finite sigma draws no noise.
        if let (Some(rng), Ok(normal)) = (rng, Normal::new(0.0, self.noise_sigma)) {
            if self.noise_sigma > 0.0 {
                for p in frame.pixels_mut() {
                    p[0] += normal.sample(rng);
                }
            }
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn disk_scene_has_expected_levels() {
        let f = EyeScene::disk(40, 30, [20.0, 15.0], 6.0, 1.0, 0.0).render(None);
        assert_eq!(f.dimensions(), (40, 30));
        assert_eq!(f.get_pixel(20, 15)[0], 1.0);
        assert_eq!(f.get_pixel(2, 2)[0], 0.0);
        let edge = f.get_pixel(26, 15)[0];
        assert!(edge > 0.0 && edge < 1.0, "edge pixel {edge}");
    }

    #[test]
    fn glint_draws_over_pupil() {
        let scene = EyeScene {
            blur_sigma: 0.0,
            noise_sigma: 0.0,
            ..EyeScene::default()
        };
        let f = scene.render(None);
        assert_relative_eq!(f.get_pixel(172, 110)[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(f.get_pixel(150, 130)[0], scene.pupil_intensity, epsilon = 1e-6);
        assert_relative_eq!(f.get_pixel(110, 120)[0], scene.iris_intensity, epsilon = 1e-6);
        assert_relative_eq!(f.get_pixel(5, 5)[0], scene.background, epsilon = 1e-6);
    }

    #[test]
    fn noise_is_seeded() {
        let scene = EyeScene {
            noise_sigma: 0.05,
            ..EyeScene::default()
        };
        let a = scene.render(Some(&mut StdRng::seed_from_u64(1)));
        let b = scene.render(Some(&mut StdRng::seed_from_u64(1)));
        assert_eq!(a.as_raw(), b.as_raw());
        let clean = scene.render(None);
        assert_ne!(a.as_raw(), clean.as_raw());
    }

    #[test]
    fn noise_has_requested_spread() {
        let scene = EyeScene {
            background: 0.5,
            iris_radius: None,
            cr_center: None,
            pupil_intensity: 0.5,
            blur_sigma: 0.0,
            noise_sigma: 0.05,
            ..EyeScene::default()
        };
        let f = scene.render(Some(&mut StdRng::seed_from_u64(4)));
        let n = f.as_raw().len() as f64;
        let mean = f.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = f.as_raw().iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert_relative_eq!(mean, 0.5, epsilon = 1e-3);
        assert_relative_eq!(var.sqrt(), 0.05, epsilon = 2e-3);
    }

    #[test]
    fn negative_noise_sigma_draws_nothing() {
        let scene = EyeScene {
            noise_sigma: -0.1,
            ..EyeScene::default()
        };
        let noisy = scene.render(Some(&mut StdRng::seed_from_u64(2)));
        assert_eq!(noisy.as_raw(), scene.render(None).as_raw());
    }
}
