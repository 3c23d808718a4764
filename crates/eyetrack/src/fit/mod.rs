//! Boundary fitting for pupil and corneal-reflection edge points.
//!
//! - Point-cloud mean, the cheapest estimate.
//! - Algebraic least-squares circle (Kåsa).
//! - RANSAC circle for edge sets with stray eyelid or glint points.
//! - Direct least-squares ellipse for off-axis pupils.

mod circle;
mod ellipse;

pub use circle::{fit_circle, fit_circle_ransac, fit_mean, Circle, CircleRansacConfig};
pub use ellipse::{fit_ellipse, Conic, Ellipse};

use serde::{Deserialize, Serialize};

/// Model fitted to the boundary points of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Algebraic least-squares circle.
    #[default]
    Circle,
    /// Circle with RANSAC outlier rejection.
    CircleRansac,
    /// Direct ellipse fit; the reported radius is the semi-major axis.
    Ellipse,
    /// Centroid of the edge points and their mean distance from it.
    Mean,
}

/// Fitted boundary expressed as center + radius, with the ellipse when one
/// was fitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryFit {
    /// Center `[x, y]`.
    pub center: [f64; 2],
    /// Radius (semi-major axis for ellipse fits).
    pub radius: f64,
    /// Full ellipse parameters for [`FitMethod::Ellipse`].
    pub ellipse: Option<Ellipse>,
}

impl BoundaryFit {
    /// Absolute distance of `p` from the fitted boundary.
    pub fn distance(&self, p: [f64; 2]) -> f64 {
        match &self.ellipse {
            Some(e) => e.sampson_distance(p),
            None => {
                let c = Circle {
                    center: self.center,
                    radius: self.radius,
                };
                c.residual(p).abs()
            }
        }
    }

    /// RMS of [`Self::distance`] over `points`.
    pub fn rms_distance(&self, points: &[[f64; 2]]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum: f64 = points.iter().map(|&p| self.distance(p).powi(2)).sum();
        (sum / points.len() as f64).sqrt()
    }
}

/// Minimum number of points `method` needs.
pub fn min_points(method: FitMethod) -> usize {
    match method {
        FitMethod::Circle | FitMethod::CircleRansac | FitMethod::Mean => 3,
        FitMethod::Ellipse => 6,
    }
}

/// Fit `points` with `method`. `None` when the point set is degenerate.
pub fn fit_boundary(
    points: &[[f64; 2]],
    method: FitMethod,
    ransac: &CircleRansacConfig,
) -> Option<BoundaryFit> {
    let from_circle = |c: Circle| BoundaryFit {
        center: c.center,
        radius: c.radius,
        ellipse: None,
    };
    match method {
        FitMethod::Circle => fit_circle(points).map(from_circle),
        FitMethod::CircleRansac => fit_circle_ransac(points, ransac).map(from_circle),
        FitMethod::Mean => fit_mean(points).map(from_circle),
        FitMethod::Ellipse => fit_ellipse(points).map(|e| BoundaryFit {
            center: e.center,
            radius: e.semi_major,
            ellipse: Some(e),
        }),
    }
}
