//! Coarse pupil / glint localisation.
//!
//! The frame is block-averaged down to roughly `target_kpixels` thousand
//! pixels, a radial-symmetry transform is evaluated over a small set of radii
//! and the strongest responses of each sign are taken as pupil and corneal
//! reflection. Dark radially symmetric blobs (a dark pupil) vote negative,
//! bright ones (the glint, or a bright pupil) vote positive.

mod peaks;

pub(crate) use peaks::parabolic_offset;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{Extrema, ImageBackend};
use crate::error::TrackError;
use crate::frame::{self, Frame};
use crate::pipeline::Guess;
use peaks::{local_maxima, neighbourhood_mean, refine_subpixel, Peak};

/// Which sign of radial-symmetry response marks the pupil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PupilPolarity {
    /// Pupil darker than its surroundings (off-axis illumination).
    Dark,
    /// Pupil brighter than its surroundings (on-axis illumination).
    Bright,
    /// Dark unless the negative response is negligible next to the positive
    /// one (see [`CoarseConfig::auto_dark_fraction`]).
    #[default]
    Auto,
}

/// Search window in full-resolution pixels; rows `top..bottom`, columns
/// `left..right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRoi {
    /// First row searched.
    pub top: u32,
    /// One past the last row searched.
    pub bottom: u32,
    /// First column searched.
    pub left: u32,
    /// One past the last column searched.
    pub right: u32,
}

/// Coarse stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseConfig {
    /// Working resolution in thousands of pixels for the adaptive factor.
    pub target_kpixels: f64,
    /// Fixed downsampling factor; overrides `target_kpixels` when set.
    pub downsample: Option<u32>,
    /// Smallest transform radius as a fraction of the downsampled height.
    pub min_radius_fraction: f64,
    /// Largest transform radius as a fraction of the downsampled height.
    pub max_radius_fraction: f64,
    /// Number of radii spread between the two fractions.
    pub radius_steps: usize,
    /// Explicit radii in downsampled pixels; overrides the fractions.
    pub radii: Option<Vec<u32>>,
    /// Radial strictness exponent.
    pub alpha: f32,
    /// Pupil polarity.
    pub polarity: PupilPolarity,
    /// In `Auto` mode the pupil is dark whenever the strongest negative
    /// response reaches this fraction of the strongest positive one. A small
    /// glint outvotes a large dark pupil, so only a near-absent negative
    /// response means a bright pupil.
    pub auto_dark_fraction: f32,
    /// Responses with smaller magnitude are not peaks.
    pub min_response: f32,
    /// Glint response must reach this fraction of the pupil response.
    pub cr_min_relative_response: f32,
    /// Minimum glint-to-pupil distance in downsampled pixels.
    pub cr_min_separation: f64,
    /// Optional search window.
    pub roi: Option<SearchRoi>,
    /// Report the mean Sobel magnitude of the downsampled frame.
    pub compute_gradient_mean: bool,
}

impl Default for CoarseConfig {
    fn default() -> Self {
        Self {
            target_kpixels: 10.0,
            downsample: None,
            min_radius_fraction: 0.0126,
            max_radius_fraction: 0.12,
            radius_steps: 6,
            radii: None,
            alpha: 10.0,
            polarity: PupilPolarity::Auto,
            auto_dark_fraction: 0.01,
            min_response: 1e-6,
            cr_min_relative_response: 0.1,
            cr_min_separation: 2.0,
            roi: None,
            compute_gradient_mean: true,
        }
    }
}

impl CoarseConfig {
    /// Downsampling factor for a `width x height` frame.
    pub fn downsample_factor(&self, width: u32, height: u32) -> u32 {
        if let Some(ds) = self.downsample {
            return ds.max(1);
        }
        let pixels = width as f64 * height as f64;
        let target = (self.target_kpixels * 1000.0).max(1.0);
        ((pixels / target).sqrt().floor() as u32).max(1)
    }

    /// Radii for a downsampled frame of height `height_ds`.
    pub fn radii_for_height(&self, height_ds: u32) -> Vec<u32> {
        let mut radii: Vec<u32> = match &self.radii {
            Some(explicit) => explicit.clone(),
            None => {
                let h = height_ds as f64;
                let lo = (self.min_radius_fraction * h).ceil();
                let hi = (self.max_radius_fraction * h).ceil();
                let steps = self.radius_steps.max(1);
                (0..steps)
                    .map(|i| {
                        let t = if steps == 1 {
                            0.0
                        } else {
                            i as f64 / (steps - 1) as f64
                        };
                        (lo + t * (hi - lo)) as u32
                    })
                    .collect()
            }
        };
        radii.retain(|&r| r > 0);
        radii.sort_unstable();
        radii.dedup();
        if radii.is_empty() {
            radii.push(1);
        }
        radii
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !(self.target_kpixels.is_finite() && self.target_kpixels > 0.0) {
            return Err(format!(
                "coarse.target_kpixels must be positive, got {}",
                self.target_kpixels
            ));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(format!("coarse.alpha must be >= 0, got {}", self.alpha));
        }
        if !(0.0..=1.0).contains(&self.auto_dark_fraction) {
            return Err(format!(
                "coarse.auto_dark_fraction must lie in [0, 1], got {}",
                self.auto_dark_fraction
            ));
        }
        if self.max_radius_fraction < self.min_radius_fraction {
            return Err("coarse.max_radius_fraction < coarse.min_radius_fraction".into());
        }
        if let Some(roi) = &self.roi {
            if roi.bottom <= roi.top || roi.right <= roi.left {
                return Err(format!("coarse.roi is empty: {roi:?}"));
            }
        }
        Ok(())
    }
}

/// Output of [`CoarseLocator::locate`].
///
/// Positions are in downsampled pixel coordinates.
#[derive(Debug, Clone)]
pub struct CoarseResult {
    /// Pupil peak, sub-pixel.
    pub pupil_position: Option<[f64; 2]>,
    /// Glint peak, sub-pixel.
    pub cr_position: Option<[f64; 2]>,
    /// Transform value at the pupil peak.
    pub pupil_response: Option<f32>,
    /// Transform value at the glint peak.
    pub cr_response: Option<f32>,
    /// Polarity actually used (never `Auto`).
    pub polarity: PupilPolarity,
    /// Factor between full and downsampled resolution.
    pub downsample_factor: u32,
    /// Radii the transform was evaluated at.
    pub radii: Vec<u32>,
    /// Downsampled frame.
    pub image: Frame,
    /// Radial-symmetry response of `image`.
    pub transform: Frame,
    /// Mean Sobel magnitude of `image`, when enabled.
    pub gradient_mean: Option<f32>,
}

impl CoarseResult {
    /// Pupil and glint positions mapped back to full resolution.
    pub fn to_full_resolution(&self) -> (Option<[f64; 2]>, Option<[f64; 2]>) {
        let ds = self.downsample_factor;
        (
            self.pupil_position.map(|p| frame::upsample_coord(p, ds)),
            self.cr_position.map(|p| frame::upsample_coord(p, ds)),
        )
    }
}

/// Stage 1 of the tracker.
pub struct CoarseLocator {
    config: CoarseConfig,
    backend: Arc<dyn ImageBackend>,
}

impl CoarseLocator {
    /// Locator sharing `backend` with the rest of the pipeline.
    pub fn new(config: CoarseConfig, backend: Arc<dyn ImageBackend>) -> Self {
        Self { config, backend }
    }

    /// Current configuration.
    pub fn config(&self) -> &CoarseConfig {
        &self.config
    }

    /// Find pupil and glint peaks.
    ///
    /// A missing peak is reported as `None`; only malformed frames and backend
    /// faults are errors. A `cr_position` in `guess` breaks ties between
    /// glint candidates in favour of the one nearest to it.
    pub fn locate(&self, frame: &Frame, guess: Option<&Guess>) -> Result<CoarseResult, TrackError> {
        frame::validate(frame)?;
        let (w, h) = frame.dimensions();
        let ds = self.config.downsample_factor(w, h);
        let image = frame::downsample(frame, ds);
        let radii = self.config.radii_for_height(image.height());

        let mut transform =
            self.backend
                .radial_symmetry_transform(&image, &radii, self.config.alpha)?;
        if let Some(roi) = &self.config.roi {
            apply_roi(&mut transform, roi, ds);
        }

        let gradient_mean = if self.config.compute_gradient_mean {
            Some(self.backend.sobel(&image)?.mean_magnitude())
        } else {
            None
        };

        let extrema = self.backend.find_local_extrema(&transform)?;
        let polarity = resolve_polarity(&self.config, &extrema);
        let cr_hint = guess
            .and_then(|g| g.cr_position)
            .map(|p| frame::downsample_coord(p, ds));

        let (pupil, cr) = match polarity {
            PupilPolarity::Bright => self.bright_pupil(&image, &transform, cr_hint),
            _ => self.dark_pupil(&transform, &extrema, cr_hint),
        };

        let result = CoarseResult {
            pupil_position: pupil.map(|p| refine_subpixel(&transform, p.xy)),
            cr_position: cr.map(|p| refine_subpixel(&transform, p.xy)),
            pupil_response: pupil.map(|p| p.value),
            cr_response: cr.map(|p| p.value),
            polarity,
            downsample_factor: ds,
            radii,
            image,
            transform,
            gradient_mean,
        };
        tracing::debug!(
            ds,
            radii = ?result.radii,
            ?polarity,
            pupil = ?result.pupil_position,
            cr = ?result.cr_position,
            "coarse stage"
        );
        Ok(result)
    }

    fn dark_pupil(
        &self,
        transform: &Frame,
        extrema: &Extrema,
        cr_hint: Option<[f64; 2]>,
    ) -> (Option<Peak>, Option<Peak>) {
        let cfg = &self.config;
        let pupil = (-extrema.min.value >= cfg.min_response).then_some(Peak {
            xy: extrema.min.xy,
            value: extrema.min.value,
        });
        let floor = match pupil {
            Some(p) => cfg.min_response.max(cfg.cr_min_relative_response * p.value.abs()),
            None => cfg.min_response,
        };
        let candidates: Vec<Peak> = local_maxima(transform, floor)
            .into_iter()
            .filter(|c| pupil.map_or(true, |p| separation(c, &p) >= cfg.cr_min_separation))
            .collect();
        (pupil, choose(&candidates, cr_hint))
    }

    fn bright_pupil(
        &self,
        image: &Frame,
        transform: &Frame,
        cr_hint: Option<[f64; 2]>,
    ) -> (Option<Peak>, Option<Peak>) {
        let cfg = &self.config;
        let peaks = local_maxima(transform, cfg.min_response);
        let Some(&top) = peaks.first() else {
            return (None, None);
        };
        let floor = cfg.cr_min_relative_response * top.value;
        let others: Vec<Peak> = peaks[1..]
            .iter()
            .copied()
            .filter(|c| c.value >= floor && separation(c, &top) >= cfg.cr_min_separation)
            .collect();
        match choose(&others, cr_hint) {
            // Two bright blobs: the glint is the brighter one in the image.
            Some(second) => {
                if neighbourhood_mean(image, second.xy) > neighbourhood_mean(image, top.xy) {
                    (Some(top), Some(second))
                } else {
                    (Some(second), Some(top))
                }
            }
            None => (Some(top), None),
        }
    }
}

fn resolve_polarity(config: &CoarseConfig, extrema: &Extrema) -> PupilPolarity {
    match config.polarity {
        PupilPolarity::Auto => {
            let positive = extrema.max.value.max(0.0);
            let negative = (-extrema.min.value).max(0.0);
            if positive >= config.min_response && negative < config.auto_dark_fraction * positive {
                PupilPolarity::Bright
            } else {
                PupilPolarity::Dark
            }
        }
        fixed => fixed,
    }
}

fn separation(a: &Peak, b: &Peak) -> f64 {
    let dx = a.xy[0] as f64 - b.xy[0] as f64;
    let dy = a.xy[1] as f64 - b.xy[1] as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Strongest candidate, or the one nearest `hint` when given.
fn choose(candidates: &[Peak], hint: Option<[f64; 2]>) -> Option<Peak> {
    match hint {
        None => candidates.first().copied(),
        Some(h) => candidates.iter().copied().min_by(|a, b| {
            let da = (a.xy[0] as f64 - h[0]).hypot(a.xy[1] as f64 - h[1]);
            let db = (b.xy[0] as f64 - h[0]).hypot(b.xy[1] as f64 - h[1]);
            da.total_cmp(&db)
        }),
    }
}

/// Zero the response outside `roi` (given in full-resolution pixels).
fn apply_roi(transform: &mut Frame, roi: &SearchRoi, ds: u32) {
    let (w, h) = transform.dimensions();
    let top = (roi.top / ds).min(h);
    let bottom = roi.bottom.div_ceil(ds).min(h);
    let left = (roi.left / ds).min(w);
    let right = roi.right.div_ceil(ds).min(w);
    for (x, y, p) in transform.enumerate_pixels_mut() {
        if y < top || y >= bottom || x < left || x >= right {
            p[0] = 0.0;
        }
    }
}
