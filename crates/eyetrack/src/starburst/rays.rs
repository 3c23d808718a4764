//! Radial ray casting on a gradient-magnitude image.

use serde::{Deserialize, Serialize};

use crate::coarse::parabolic_offset;
use crate::frame::{self, Frame};

/// Ray fan parameters for one feature.
///
/// Deserialising requires every field; omit the whole object to get the
/// feature's defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayConfig {
    /// Number of rays, evenly spaced in angle starting along `+x`.
    pub n_rays: usize,
    /// Ray length in pixels without a radius prior.
    pub ray_length: f64,
    /// Distance between samples along a ray.
    pub sample_spacing: f64,
    /// Samples closer than this to the center are treated as interior and
    /// set the edge threshold.
    pub min_radius: f64,
    /// Edge threshold in standard deviations above the interior mean.
    pub threshold: f32,
    /// Relative half-width of the search band around a radius prior.
    pub radius_band: f64,
    /// Fewest edge points accepted for a fit.
    pub min_valid_rays: usize,
}

impl RayConfig {
    /// Defaults for the pupil boundary.
    pub fn pupil() -> Self {
        Self {
            n_rays: 40,
            ray_length: 40.0,
            sample_spacing: 0.5,
            min_radius: 3.0,
            threshold: 2.5,
            radius_band: 0.35,
            min_valid_rays: 8,
        }
    }

    /// Defaults for the corneal reflection.
    pub fn cr() -> Self {
        Self {
            n_rays: 20,
            ray_length: 10.0,
            sample_spacing: 0.5,
            min_radius: 1.0,
            threshold: 1.0,
            radius_band: 0.35,
            min_valid_rays: 5,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), String> {
        if self.n_rays < 3 {
            return Err(format!("{name}.n_rays must be >= 3, got {}", self.n_rays));
        }
        if !(self.sample_spacing.is_finite() && self.sample_spacing > 0.0) {
            return Err(format!(
                "{name}.sample_spacing must be positive, got {}",
                self.sample_spacing
            ));
        }
        if !(self.ray_length.is_finite() && self.ray_length > self.sample_spacing) {
            return Err(format!(
                "{name}.ray_length must exceed sample_spacing, got {}",
                self.ray_length
            ));
        }
        if !(self.radius_band > 0.0 && self.radius_band < 1.0) {
            return Err(format!(
                "{name}.radius_band must lie in (0, 1), got {}",
                self.radius_band
            ));
        }
        Ok(())
    }
}

/// Which threshold-crossing peak along a ray is taken as the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSelection {
    /// Largest gradient peak inside the search window.
    #[default]
    Strongest,
    /// Innermost gradient peak inside the search window.
    First,
}

/// How the gradient image is read along a ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaySampling {
    /// Bilinear interpolation between the four neighbouring pixels.
    #[default]
    Interpolate,
    /// Value of the nearest pixel.
    Nearest,
}

impl RaySampling {
    #[inline]
    fn sample(self, grad: &Frame, x: f32, y: f32) -> Option<f32> {
        match self {
            RaySampling::Interpolate => frame::bilinear_checked(grad, x, y),
            RaySampling::Nearest => frame::nearest_checked(grad, x, y),
        }
    }
}

/// Per-call ray parameters.
pub(crate) struct RayFan<'a> {
    pub config: &'a RayConfig,
    /// Radial search window `[lo, hi]`.
    pub window: (f64, f64),
    /// Disc whose points are never accepted as edges.
    pub exclusion: Option<([f64; 2], f64)>,
    pub selection: EdgeSelection,
    pub sampling: RaySampling,
    /// Threshold floor as a fraction of the strongest sample.
    pub floor_fraction: f32,
}

/// Edge points found by one cast.
#[derive(Debug, Clone, Default)]
pub(crate) struct RayEdges {
    pub points: Vec<[f64; 2]>,
    pub rays_total: usize,
    pub threshold: f32,
}

impl RayFan<'_> {
    /// Cast the fan from `center` over `grad`.
    pub fn cast(&self, grad: &Frame, center: [f64; 2]) -> RayEdges {
        let cfg = self.config;
        let step = cfg.sample_spacing;
        let reach = cfg.ray_length.max(self.window.1 + step);
        let n_samples = (reach / step).floor() as usize;

        let mut profiles: Vec<Vec<f32>> = Vec::with_capacity(cfg.n_rays);
        let mut directions = Vec::with_capacity(cfg.n_rays);
        let (mut sum, mut sum_sq, mut n_inner) = (0.0f64, 0.0f64, 0usize);
        let mut max_sample = 0.0f32;

        for k in 0..cfg.n_rays {
            let theta = std::f64::consts::TAU * k as f64 / cfg.n_rays as f64;
            let (sin, cos) = theta.sin_cos();
            let mut profile = Vec::with_capacity(n_samples);
            for i in 1..=n_samples {
                let r = i as f64 * step;
                let x = center[0] + r * cos;
                let y = center[1] + r * sin;
                let Some(v) = self.sampling.sample(grad, x as f32, y as f32) else {
                    break;
                };
                if r < cfg.min_radius {
                    sum += v as f64;
                    sum_sq += (v as f64) * (v as f64);
                    n_inner += 1;
                }
                max_sample = max_sample.max(v);
                profile.push(v);
            }
            profiles.push(profile);
            directions.push([cos, sin]);
        }

        // Without interior samples fall back to statistics over every sample.
        if n_inner == 0 {
            for v in profiles.iter().flatten() {
                sum += *v as f64;
                sum_sq += (*v as f64) * (*v as f64);
                n_inner += 1;
            }
        }
        let threshold = if n_inner == 0 {
            f32::INFINITY
        } else {
            let mean = sum / n_inner as f64;
            let var = (sum_sq / n_inner as f64 - mean * mean).max(0.0);
            let stat = (mean + cfg.threshold as f64 * var.sqrt()) as f32;
            stat.max(self.floor_fraction * max_sample)
        };

        let mut points = Vec::with_capacity(cfg.n_rays);
        for (profile, dir) in profiles.iter().zip(&directions) {
            if let Some(r) = self.pick_edge(profile, *dir, center, threshold) {
                points.push([center[0] + r * dir[0], center[1] + r * dir[1]]);
            }
        }
        tracing::trace!(
            found = points.len(),
            rays = cfg.n_rays,
            threshold,
            "ray fan cast"
        );
        RayEdges {
            points,
            rays_total: cfg.n_rays,
            threshold,
        }
    }

    /// Sub-sample edge radius along one ray profile.
    fn pick_edge(
        &self,
        profile: &[f32],
        dir: [f64; 2],
        center: [f64; 2],
        threshold: f32,
    ) -> Option<f64> {
        let step = self.config.sample_spacing;
        let (lo, hi) = self.window;
        let mut best: Option<(usize, f32)> = None;
        // profile[i] sits at radius (i + 1) * step.
        for i in 1..profile.len().saturating_sub(1) {
            let r = (i + 1) as f64 * step;
            if r < lo {
                continue;
            }
            if r > hi {
                break;
            }
            let v = profile[i];
            if v <= threshold || v < profile[i - 1] || v <= profile[i + 1] {
                continue;
            }
            if let Some((ec, er)) = self.exclusion {
                let px = center[0] + r * dir[0] - ec[0];
                let py = center[1] + r * dir[1] - ec[1];
                if px * px + py * py <= er * er {
                    continue;
                }
            }
            match self.selection {
                EdgeSelection::First => {
                    best = Some((i, v));
                    break;
                }
                EdgeSelection::Strongest => {
                    if best.map_or(true, |(_, bv)| v > bv) {
                        best = Some((i, v));
                    }
                }
            }
        }
        let (i, _) = best?;
        let offset = parabolic_offset(profile[i - 1], profile[i], profile[i + 1]) as f64;
        Some(((i + 1) as f64 + offset) * step)
    }
}
