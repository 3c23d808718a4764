//! Sub-pixel refinement of pupil and glint boundaries ("starburst").
//!
//! From a seed center, rays are cast over the gradient magnitude image and
//! the boundary crossing on each ray becomes an edge point. A robust circle
//! or ellipse fit to the edge points gives a new center and radius; the fan
//! is re-cast from there with the fitted radius as prior until the center
//! stops moving.
//!
//! The glint is refined first so that its bright rim can be masked out of
//! the pupil edge set.

mod rays;

pub use rays::{EdgeSelection, RayConfig, RaySampling};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::ImageBackend;
use crate::error::TrackError;
use crate::fit::{self, BoundaryFit, CircleRansacConfig, Ellipse, FitMethod};
use crate::frame::{self, Frame};
use crate::pipeline::Guess;
use rays::RayFan;

/// Refinement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StarburstConfig {
    /// Pupil ray fan.
    pub pupil: RayConfig,
    /// Glint ray fan.
    pub cr: RayConfig,
    /// Hard cap on cast/fit rounds per feature.
    pub max_iterations: u32,
    /// Center shift (pixels) below which a feature counts as converged.
    pub convergence_tolerance: f64,
    /// Edge points whose radius deviates from the median by more than this
    /// fraction of the median are dropped before fitting.
    pub outlier_tolerance: f64,
    /// Boundary model.
    pub fit_method: FitMethod,
    /// Parameters for [`FitMethod::CircleRansac`].
    pub ransac: CircleRansacConfig,
    /// Edge choice when a ray crosses several boundaries.
    pub edge_selection: EdgeSelection,
    /// Gradient sampling along rays.
    pub ray_sampling: RaySampling,
    /// Edge threshold floor as a fraction of the strongest ray sample.
    pub edge_floor_fraction: f32,
    /// Pupil edges within this multiple of the glint radius around the glint
    /// center are ignored.
    pub cr_exclusion_factor: f64,
    /// A glint farther than this multiple of the pupil radius from the pupil
    /// center is discarded.
    pub cr_max_offset_factor: f64,
    /// Without a pupil radius prior, pupil rays reach at least this multiple
    /// of the largest radius the coarse stage searched.
    pub pupil_reach_factor: f64,
}

impl Default for StarburstConfig {
    fn default() -> Self {
        Self {
            pupil: RayConfig::pupil(),
            cr: RayConfig::cr(),
            max_iterations: 8,
            convergence_tolerance: 0.05,
            outlier_tolerance: 0.2,
            fit_method: FitMethod::Circle,
            ransac: CircleRansacConfig::default(),
            edge_selection: EdgeSelection::Strongest,
            ray_sampling: RaySampling::Interpolate,
            edge_floor_fraction: 0.25,
            cr_exclusion_factor: 2.0,
            cr_max_offset_factor: 3.0,
            pupil_reach_factor: 1.25,
        }
    }
}

impl StarburstConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        self.pupil.validate("starburst.pupil")?;
        self.cr.validate("starburst.cr")?;
        if self.max_iterations == 0 {
            return Err("starburst.max_iterations must be >= 1".into());
        }
        if self.outlier_tolerance.is_nan() || self.outlier_tolerance <= 0.0 {
            return Err(format!(
                "starburst.outlier_tolerance must be positive, got {}",
                self.outlier_tolerance
            ));
        }
        if !(self.ransac.inlier_threshold.is_finite() && self.ransac.inlier_threshold > 0.0) {
            return Err(format!(
                "starburst.ransac.inlier_threshold must be positive, got {}",
                self.ransac.inlier_threshold
            ));
        }
        if self.pupil_reach_factor.is_nan() || self.pupil_reach_factor < 0.0 {
            return Err(format!(
                "starburst.pupil_reach_factor must be >= 0, got {}",
                self.pupil_reach_factor
            ));
        }
        Ok(())
    }
}

/// Why a feature could not be refined.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RefineFailure {
    /// No seed position was available.
    #[error("no seed position")]
    NoSeed,
    /// The seed or an intermediate center left the frame.
    #[error("center ({x:.1}, {y:.1}) is outside the frame")]
    SeedOutsideFrame {
        /// Offending x.
        x: f64,
        /// Offending y.
        y: f64,
    },
    /// Too few rays produced an edge point.
    #[error("only {found} edge points, need {needed}")]
    TooFewEdges {
        /// Usable edge points.
        found: usize,
        /// Required edge points.
        needed: usize,
    },
    /// The boundary model could not be fitted or was implausible.
    #[error("degenerate boundary fit")]
    DegenerateFit,
    /// The glint lies too far from the pupil to be a corneal reflection.
    #[error("glint is {offset:.1} px from the pupil center (limit {limit:.1})")]
    OutsidePupil {
        /// Glint-to-pupil distance.
        offset: f64,
        /// Allowed distance.
        limit: f64,
    },
}

/// Successful refinement of one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFit {
    /// Center `[x, y]`.
    pub center: [f64; 2],
    /// Radius (semi-major axis for ellipse fits).
    pub radius: f64,
    /// Ellipse parameters when fitted with [`FitMethod::Ellipse`].
    pub ellipse: Option<Ellipse>,
    /// Cast/fit rounds performed.
    pub iterations: u32,
    /// Whether the center shift fell below the tolerance.
    pub converged: bool,
    /// Edge points kept for the final fit.
    pub rays_used: usize,
    /// Rays cast in the final round.
    pub rays_total: usize,
    /// RMS distance of kept edge points from the fitted boundary.
    pub rms_residual: f64,
    /// Gradient threshold of the final ray cast.
    pub edge_threshold: f32,
    /// Edge points kept for the final fit.
    pub boundary_points: Vec<[f64; 2]>,
}

/// Per-feature refinement outcome.
#[derive(Debug, Clone)]
pub struct RefinedResult {
    /// Pupil outcome.
    pub pupil: Result<FeatureFit, RefineFailure>,
    /// Glint outcome.
    pub cr: Result<FeatureFit, RefineFailure>,
}

/// Optional inputs to [`SubpixelRefiner::refine_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RefineHints<'a> {
    /// Gradient magnitude of the frame, reused instead of recomputed when its
    /// size matches the frame.
    pub gradient: Option<&'a Frame>,
    /// Outer search radius for the pupil when the seed carries no pupil
    /// radius prior. The pupil ray length is used when this is shorter.
    pub pupil_reach: Option<f64>,
}

/// Stage 2 of the tracker.
pub struct SubpixelRefiner {
    config: StarburstConfig,
    backend: Arc<dyn ImageBackend>,
}

impl SubpixelRefiner {
    /// Refiner sharing `backend` with the rest of the pipeline.
    pub fn new(config: StarburstConfig, backend: Arc<dyn ImageBackend>) -> Self {
        Self { config, backend }
    }

    /// Current configuration.
    pub fn config(&self) -> &StarburstConfig {
        &self.config
    }

    /// Refine pupil and glint from the positions (and optional radius priors)
    /// in `seed`.
    ///
    /// Per-feature failures are data in the returned [`RefinedResult`]; only
    /// malformed input and backend faults are errors.
    pub fn refine(&self, frame: &Frame, seed: &Guess) -> Result<RefinedResult, TrackError> {
        self.refine_with(frame, seed, &RefineHints::default())
    }

    /// [`Self::refine`] with a precomputed gradient and/or a pupil search
    /// reach.
    pub fn refine_with(
        &self,
        frame: &Frame,
        seed: &Guess,
        hints: &RefineHints<'_>,
    ) -> Result<RefinedResult, TrackError> {
        frame::validate(frame)?;
        seed.validate()?;
        let computed;
        let grad = match hints.gradient {
            Some(g) if g.dimensions() == frame.dimensions() => g,
            _ => {
                computed = self.backend.sobel(frame)?.magnitude;
                &computed
            }
        };
        let cfg = &self.config;

        let cr = match seed.cr_position {
            Some(p) => self.fit_feature(grad, p, seed.cr_radius, None, &cfg.cr, None),
            None => Err(RefineFailure::NoSeed),
        };

        let exclusion = cr
            .as_ref()
            .ok()
            .map(|c| (c.center, cfg.cr_exclusion_factor * c.radius));
        let pupil = match seed.pupil_position {
            Some(p) => self.fit_feature(
                grad,
                p,
                seed.pupil_radius,
                hints.pupil_reach,
                &cfg.pupil,
                exclusion,
            ),
            None => Err(RefineFailure::NoSeed),
        };

        let cr = match (cr, &pupil) {
            (Ok(c), Ok(p)) => {
                let offset = (c.center[0] - p.center[0]).hypot(c.center[1] - p.center[1]);
                let limit = cfg.cr_max_offset_factor * p.radius;
                if offset > limit {
                    Err(RefineFailure::OutsidePupil { offset, limit })
                } else {
                    Ok(c)
                }
            }
            (cr, _) => cr,
        };

        if let Err(e) = &pupil {
            tracing::debug!(reason = %e, "pupil refinement failed");
        }
        if let Err(e) = &cr {
            tracing::debug!(reason = %e, "glint refinement failed");
        }
        Ok(RefinedResult { pupil, cr })
    }

    fn fit_feature(
        &self,
        grad: &Frame,
        seed: [f64; 2],
        radius_prior: Option<f64>,
        reach: Option<f64>,
        rays: &RayConfig,
        exclusion: Option<([f64; 2], f64)>,
    ) -> Result<FeatureFit, RefineFailure> {
        let cfg = &self.config;
        let needed = rays.min_valid_rays.max(fit::min_points(cfg.fit_method));
        let mut center = seed;
        let mut prior = radius_prior;
        let mut last: Option<FeatureFit> = None;

        for iteration in 1..=cfg.max_iterations {
            if !frame::contains(grad, center) {
                return Err(RefineFailure::SeedOutsideFrame {
                    x: center[0],
                    y: center[1],
                });
            }
            let window = match prior {
                Some(r) => (
                    (r * (1.0 - rays.radius_band)).max(rays.sample_spacing),
                    r * (1.0 + rays.radius_band),
                ),
                None => (
                    rays.min_radius,
                    reach.map_or(rays.ray_length, |r| r.max(rays.ray_length)),
                ),
            };
            let fan = RayFan {
                config: rays,
                window,
                exclusion,
                selection: cfg.edge_selection,
                sampling: cfg.ray_sampling,
                floor_fraction: cfg.edge_floor_fraction,
            };
            let edges = fan.cast(grad, center);
            if edges.points.len() < needed {
                return Err(RefineFailure::TooFewEdges {
                    found: edges.points.len(),
                    needed,
                });
            }

            let points = reject_radial_outliers(&edges.points, center, cfg.outlier_tolerance);
            if points.len() < needed {
                return Err(RefineFailure::TooFewEdges {
                    found: points.len(),
                    needed,
                });
            }
            let (fit, points) = self.robust_fit(points, needed)?;
            if !fit.radius.is_finite() || fit.radius > 2.0 * window.1.max(rays.ray_length) {
                return Err(RefineFailure::DegenerateFit);
            }

            let shift = (fit.center[0] - center[0]).hypot(fit.center[1] - center[1]);
            let converged = shift < cfg.convergence_tolerance;
            center = fit.center;
            prior = Some(fit.radius);
            last = Some(FeatureFit {
                center: fit.center,
                radius: fit.radius,
                ellipse: fit.ellipse,
                iterations: iteration,
                converged,
                rays_used: points.len(),
                rays_total: edges.rays_total,
                rms_residual: fit.rms_distance(&points),
                edge_threshold: edges.threshold,
                boundary_points: points,
            });
            tracing::trace!(iteration, shift, radius = fit.radius, "starburst round");
            if converged {
                break;
            }
        }
        last.ok_or(RefineFailure::DegenerateFit)
    }

    /// Fit, drop points far from the fitted boundary, refit once.
    fn robust_fit(
        &self,
        points: Vec<[f64; 2]>,
        needed: usize,
    ) -> Result<(BoundaryFit, Vec<[f64; 2]>), RefineFailure> {
        let cfg = &self.config;
        let fit = fit::fit_boundary(&points, cfg.fit_method, &cfg.ransac)
            .ok_or(RefineFailure::DegenerateFit)?;
        let cutoff = (2.0 * fit.rms_distance(&points)).max(0.5);
        let kept: Vec<[f64; 2]> = points
            .iter()
            .copied()
            .filter(|&p| fit.distance(p) <= cutoff)
            .collect();
        if kept.len() == points.len() || kept.len() < needed {
            return Ok((fit, points));
        }
        match fit::fit_boundary(&kept, cfg.fit_method, &cfg.ransac) {
            Some(refit) => Ok((refit, kept)),
            None => Ok((fit, points)),
        }
    }
}

/// Keep points whose distance from `center` is within `tolerance * median`
/// of the median distance.
fn reject_radial_outliers(points: &[[f64; 2]], center: [f64; 2], tolerance: f64) -> Vec<[f64; 2]> {
    let radii: Vec<f64> = points
        .iter()
        .map(|p| (p[0] - center[0]).hypot(p[1] - center[1]))
        .collect();
    let mut sorted = radii.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = match sorted.len() {
        0 => return Vec::new(),
        n if n % 2 == 1 => sorted[n / 2],
        n => 0.5 * (sorted[n / 2 - 1] + sorted[n / 2]),
    };
    let limit = tolerance * median;
    points
        .iter()
        .zip(&radii)
        .filter(|(_, &r)| (r - median).abs() <= limit)
        .map(|(&p, _)| p)
        .collect()
}
