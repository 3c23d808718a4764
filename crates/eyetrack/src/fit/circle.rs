//! Circle fits: point-cloud mean, algebraic (Kåsa) and its RANSAC wrapper.

use nalgebra::{Matrix3, Vector3};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Geometric circle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center `[x, y]`.
    pub center: [f64; 2],
    /// Radius in pixels.
    pub radius: f64,
}

impl Circle {
    /// Signed radial residual of a point (positive outside).
    #[inline]
    pub fn residual(&self, p: [f64; 2]) -> f64 {
        let dx = p[0] - self.center[0];
        let dy = p[1] - self.center[1];
        (dx * dx + dy * dy).sqrt() - self.radius
    }

    /// RMS of radial residuals.
    pub fn rms_residual(&self, points: &[[f64; 2]]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum: f64 = points.iter().map(|&p| self.residual(p).powi(2)).sum();
        (sum / points.len() as f64).sqrt()
    }

    fn is_valid(&self) -> bool {
        self.center[0].is_finite()
            && self.center[1].is_finite()
            && self.radius.is_finite()
            && self.radius > 0.0
    }
}

/// Centroid of `points` as center and their mean distance from it as radius.
///
/// Biased towards the denser side when the points cover only part of the
/// boundary.
pub fn fit_mean(points: &[[f64; 2]]) -> Option<Circle> {
    if points.is_empty() {
        return None;
    }
    let inv_n = 1.0 / points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() * inv_n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() * inv_n;
    let radius = points
        .iter()
        .map(|p| (p[0] - mx).hypot(p[1] - my))
        .sum::<f64>()
        * inv_n;
    let circle = Circle {
        center: [mx, my],
        radius,
    };
    circle.is_valid().then_some(circle)
}

/// Least-squares circle minimising `sum (x² + y² + D x + E y + F)²`.
///
/// Points are centred and scaled before solving the 3x3 normal equations.
/// Needs at least three non-collinear points.
pub fn fit_circle(points: &[[f64; 2]]) -> Option<Circle> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() * inv_n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() * inv_n;
    let spread = points
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        * inv_n;
    if spread <= 1e-12 {
        return None;
    }
    let s = 1.0 / spread;

    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    for p in points {
        let x = (p[0] - mx) * s;
        let y = (p[1] - my) * s;
        let row = Vector3::new(x, y, 1.0);
        ata += row * row.transpose();
        atb -= row * (x * x + y * y);
    }
    // Collinear points leave the 2x2 scatter block rank-deficient.
    let (sxx, syy, sxy) = (ata[(0, 0)], ata[(1, 1)], ata[(0, 1)]);
    if sxx * syy - sxy * sxy <= 1e-9 * (sxx + syy).powi(2) {
        return None;
    }
    let sol = ata.cholesky()?.solve(&atb);
    let (d, e, f) = (sol[0], sol[1], sol[2]);
    let r2 = 0.25 * (d * d + e * e) - f;
    if r2.is_nan() || r2 <= 0.0 {
        return None;
    }
    let circle = Circle {
        center: [mx - 0.5 * d / s, my - 0.5 * e / s],
        radius: r2.sqrt() / s,
    };
    circle.is_valid().then_some(circle)
}

/// RANSAC parameters for [`fit_circle_ransac`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleRansacConfig {
    /// Number of random three-point hypotheses.
    pub iterations: usize,
    /// Largest radial residual (pixels) of an inlier.
    pub inlier_threshold: f64,
    /// Hypotheses with a radius above this multiple of the point-cloud extent
    /// are skipped; near-collinear samples produce them.
    pub max_radius_factor: f64,
    /// Minimum consensus size for a hypothesis to be accepted.
    pub min_inliers: usize,
    /// RNG seed; fixed so repeated calls on the same points agree.
    pub seed: u64,
}

impl Default for CircleRansacConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            inlier_threshold: 1.0,
            max_radius_factor: 4.0,
            min_inliers: 8,
            seed: 7,
        }
    }
}

/// Outlier-robust circle fit.
///
/// Draws three-point samples, keeps the hypothesis with the largest consensus
/// (points within `inlier_threshold` pixels of it) and refits on its inliers.
/// Falls back to `None` when no hypothesis reaches `min_inliers`.
pub fn fit_circle_ransac(points: &[[f64; 2]], config: &CircleRansacConfig) -> Option<Circle> {
    let n = points.len();
    if n < 3 {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() * inv_n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() * inv_n;
    let extent = points
        .iter()
        .map(|p| (p[0] - mx).hypot(p[1] - my))
        .fold(0.0f64, f64::max);
    let max_radius = config.max_radius_factor * extent;
    let tol = config.inlier_threshold;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(usize, Vec<bool>)> = None;

    for _ in 0..config.iterations.max(1) {
        let idx = sample_indices(&mut rng, n, 3);
        let sample = [points[idx[0]], points[idx[1]], points[idx[2]]];
        let Some(hyp) = fit_circle(&sample) else {
            continue;
        };
        if hyp.radius > max_radius {
            continue;
        }
        let mask: Vec<bool> = points.iter().map(|&p| hyp.residual(p).abs() <= tol).collect();
        let count = mask.iter().filter(|&&m| m).count();
        if best.as_ref().map_or(true, |(c, _)| count > *c) {
            best = Some((count, mask));
            if count == n {
                break;
            }
        }
    }

    let (count, mask) = best?;
    if count < config.min_inliers.max(3) {
        return None;
    }
    let inliers: Vec<[f64; 2]> = points
        .iter()
        .zip(&mask)
        .filter_map(|(&p, &m)| m.then_some(p))
        .collect();
    fit_circle(&inliers)
}

/// `k` distinct indices from `0..n` (partial Fisher–Yates).
fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..k.min(n) {
        let j = rng.gen_range(i..n);
        pool.swap(i, j);
    }
    pool.truncate(k.min(n));
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ring(cx: f64, cy: f64, r: f64, n: usize) -> Vec<[f64; 2]> {
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * i as f64 / n as f64;
                [cx + r * t.cos(), cy + r * t.sin()]
            })
            .collect()
    }

    #[test]
    fn exact_points_recover_circle() {
        let c = fit_circle(&ring(40.0, -12.5, 9.0, 24)).unwrap();
        assert_relative_eq!(c.center[0], 40.0, epsilon = 1e-9);
        assert_relative_eq!(c.center[1], -12.5, epsilon = 1e-9);
        assert_relative_eq!(c.radius, 9.0, epsilon = 1e-9);
        assert!(c.rms_residual(&ring(40.0, -12.5, 9.0, 24)) < 1e-9);
    }

    #[test]
    fn noisy_arc_stays_close() {
        let mut rng = StdRng::seed_from_u64(11);
        let pts: Vec<[f64; 2]> = ring(100.0, 80.0, 25.0, 60)
            .into_iter()
            .map(|p| [p[0] + rng.gen_range(-0.3..0.3), p[1] + rng.gen_range(-0.3..0.3)])
            .collect();
        let c = fit_circle(&pts).unwrap();
        assert_relative_eq!(c.center[0], 100.0, epsilon = 0.2);
        assert_relative_eq!(c.center[1], 80.0, epsilon = 0.2);
        assert_relative_eq!(c.radius, 25.0, epsilon = 0.2);
    }

    #[test]
    fn mean_fit_of_full_ring() {
        let c = fit_mean(&ring(-3.0, 7.0, 4.5, 16)).unwrap();
        assert_relative_eq!(c.center[0], -3.0, epsilon = 1e-9);
        assert_relative_eq!(c.center[1], 7.0, epsilon = 1e-9);
        assert_relative_eq!(c.radius, 4.5, epsilon = 1e-9);
        assert!(fit_mean(&[]).is_none());
        assert!(fit_mean(&[[1.0, 1.0]; 4]).is_none());
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(fit_circle(&[[0.0, 0.0], [1.0, 1.0]]).is_none());
        assert!(fit_circle(&[[2.0, 2.0]; 5]).is_none());
        let line: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 2.0 * i as f64]).collect();
        assert!(fit_circle(&line).is_none());
    }

    #[test]
    fn ransac_ignores_outliers() {
        let mut pts = ring(30.0, 30.0, 10.0, 30);
        pts.extend([[30.0, 30.0], [45.0, 31.0], [12.0, 50.0], [31.0, 33.0]]);
        let plain = fit_circle(&pts).unwrap();
        let robust = fit_circle_ransac(&pts, &CircleRansacConfig::default()).unwrap();
        assert!((plain.radius - 10.0).abs() > (robust.radius - 10.0).abs());
        assert_relative_eq!(robust.center[0], 30.0, epsilon = 1e-6);
        assert_relative_eq!(robust.center[1], 30.0, epsilon = 1e-6);
        assert_relative_eq!(robust.radius, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn ransac_ignores_line_of_outliers() {
        let mut pts = ring(50.0, 50.0, 12.0, 24);
        pts.extend((0..15).map(|i| [20.0 + 3.0 * i as f64, 30.0]));
        let plain = fit_circle(&pts).unwrap();
        let cfg = CircleRansacConfig {
            iterations: 100,
            ..Default::default()
        };
        let robust = fit_circle_ransac(&pts, &cfg).unwrap();
        assert!((plain.center[1] - 50.0).abs() > 1.0, "{plain:?}");
        assert_relative_eq!(robust.center[0], 50.0, epsilon = 1e-6);
        assert_relative_eq!(robust.center[1], 50.0, epsilon = 1e-6);
        assert_relative_eq!(robust.radius, 12.0, epsilon = 1e-6);
    }

    #[test]
    fn ransac_skips_oversized_hypotheses() {
        let pts = ring(0.0, 0.0, 5.0, 20);
        let cfg = CircleRansacConfig {
            max_radius_factor: 0.5,
            ..Default::default()
        };
        assert!(fit_circle_ransac(&pts, &cfg).is_none());
    }

    #[test]
    fn ransac_is_deterministic_for_a_seed() {
        let mut rng = StdRng::seed_from_u64(3);
        let pts: Vec<[f64; 2]> = ring(0.0, 0.0, 5.0, 20)
            .into_iter()
            .map(|p| [p[0] + rng.gen_range(-0.1..0.1), p[1]])
            .collect();
        let cfg = CircleRansacConfig::default();
        assert_eq!(fit_circle_ransac(&pts, &cfg), fit_circle_ransac(&pts, &cfg));
    }

    #[test]
    fn ransac_needs_consensus() {
        let cfg = CircleRansacConfig {
            min_inliers: 50,
            ..Default::default()
        };
        assert!(fit_circle_ransac(&ring(0.0, 0.0, 5.0, 20), &cfg).is_none());
    }
}
