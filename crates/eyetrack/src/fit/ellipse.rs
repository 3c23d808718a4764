//! Direct least-squares ellipse fit.
//!
//! Fitzgibbon's constrained fit in the numerically stable Halíř–Flusser
//! form: the scatter matrix is split into quadratic and linear blocks, the
//! linear block is eliminated, and the remaining 3x3 eigenproblem is solved
//! in closed form. Only the eigenvector satisfying `4AC - B² > 0` describes an
//! ellipse.

use nalgebra::{Matrix2, Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Geometric ellipse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center `[x, y]`.
    pub center: [f64; 2],
    /// Semi-major axis.
    pub semi_major: f64,
    /// Semi-minor axis.
    pub semi_minor: f64,
    /// Major-axis angle from `+x`, in `(-π/2, π/2]`.
    pub angle: f64,
}

/// Conic `A x² + B xy + C y² + D x + E y + F = 0`, stored as `[A..F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conic(pub [f64; 6]);

impl Conic {
    /// Algebraic value at `p`.
    #[inline]
    pub fn eval(&self, p: [f64; 2]) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        let [x, y] = p;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// Gradient of the algebraic value at `p`.
    #[inline]
    fn gradient(&self, p: [f64; 2]) -> [f64; 2] {
        let [a, b, c, d, e, _] = self.0;
        let [x, y] = p;
        [2.0 * a * x + b * y + d, b * x + 2.0 * c * y + e]
    }

    /// Geometric parameters, or `None` unless the conic is a real ellipse.
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        let [a, b, c, d, e, f] = self.0;
        let det = 4.0 * a * c - b * b;
        if det.is_nan() || det <= 0.0 {
            return None;
        }
        let cx = (b * e - 2.0 * c * d) / det;
        let cy = (b * d - 2.0 * a * e) / det;
        let f0 = f + 0.5 * (d * cx + e * cy);

        let eig = Matrix2::new(a, 0.5 * b, 0.5 * b, c).symmetric_eigen();
        let sq0 = -f0 / eig.eigenvalues[0];
        let sq1 = -f0 / eig.eigenvalues[1];
        if !(sq0.is_finite() && sq1.is_finite()) || sq0 <= 0.0 || sq1 <= 0.0 {
            return None;
        }
        let (major_sq, minor_sq, k) = if sq0 >= sq1 {
            (sq0, sq1, 0)
        } else {
            (sq1, sq0, 1)
        };
        let axis = eig.eigenvectors.column(k);
        let mut angle = axis[1].atan2(axis[0]);
        if angle > std::f64::consts::FRAC_PI_2 {
            angle -= std::f64::consts::PI;
        } else if angle <= -std::f64::consts::FRAC_PI_2 {
            angle += std::f64::consts::PI;
        }

        let ellipse = Ellipse {
            center: [cx, cy],
            semi_major: major_sq.sqrt(),
            semi_minor: minor_sq.sqrt(),
            angle,
        };
        (cx.is_finite() && cy.is_finite()).then_some(ellipse)
    }

    /// Undo `x' = s (x - mx)`, `y' = s (y - my)`.
    fn denormalized(&self, mx: f64, my: f64, s: f64) -> Self {
        let [a, b, c, d, e, f] = self.0;
        let s2 = s * s;
        let (qa, qb, qc) = (a * s2, b * s2, c * s2);
        Self([
            qa,
            qb,
            qc,
            s * d - 2.0 * qa * mx - qb * my,
            s * e - qb * mx - 2.0 * qc * my,
            f + qa * mx * mx + qb * mx * my + qc * my * my - s * d * mx - s * e * my,
        ])
    }
}

impl Ellipse {
    /// Implicit form, scaled so the value is `-1` at the center.
    pub fn to_conic(&self) -> Conic {
        let (sin, cos) = self.angle.sin_cos();
        let ia = 1.0 / (self.semi_major * self.semi_major);
        let ib = 1.0 / (self.semi_minor * self.semi_minor);
        let a = cos * cos * ia + sin * sin * ib;
        let b = 2.0 * cos * sin * (ia - ib);
        let c = sin * sin * ia + cos * cos * ib;
        let [cx, cy] = self.center;
        Conic([
            a,
            b,
            c,
            -2.0 * a * cx - b * cy,
            -b * cx - 2.0 * c * cy,
            a * cx * cx + b * cx * cy + c * cy * cy - 1.0,
        ])
    }

    /// First-order geometric distance from `p` to the boundary.
    pub fn sampson_distance(&self, p: [f64; 2]) -> f64 {
        let conic = self.to_conic();
        let value = conic.eval(p);
        let [gx, gy] = conic.gradient(p);
        let norm = (gx * gx + gy * gy).sqrt();
        if norm < 1e-15 {
            value.abs()
        } else {
            value.abs() / norm
        }
    }

    /// RMS Sampson distance over `points`.
    pub fn rms_distance(&self, points: &[[f64; 2]]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum: f64 = points
            .iter()
            .map(|&p| self.sampson_distance(p).powi(2))
            .sum();
        (sum / points.len() as f64).sqrt()
    }

    /// `n` points evenly spaced in the parametric angle.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin, cos) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * i as f64 / n as f64;
                let u = self.semi_major * t.cos();
                let v = self.semi_minor * t.sin();
                [
                    self.center[0] + cos * u - sin * v,
                    self.center[1] + sin * u + cos * v,
                ]
            })
            .collect()
    }
}

/// Fit an ellipse to at least six boundary points.
pub fn fit_ellipse(points: &[[f64; 2]]) -> Option<Ellipse> {
    let n = points.len();
    if n < 6 {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() * inv_n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() * inv_n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        * inv_n;
    if mean_dist <= 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;

    let mut s1 = Matrix3::<f64>::zeros();
    let mut s2 = Matrix3::<f64>::zeros();
    let mut s3 = Matrix3::<f64>::zeros();
    for p in points {
        let x = (p[0] - mx) * s;
        let y = (p[1] - my) * s;
        let quad = Vector3::new(x * x, x * y, y * y);
        let lin = Vector3::new(x, y, 1.0);
        s1 += quad * quad.transpose();
        s2 += quad * lin.transpose();
        s3 += lin * lin.transpose();
    }

    let t = -(s3.try_inverse()? * s2.transpose());
    let m = s1 + s2 * t;
    // C1⁻¹ M with C1 = [[0, 0, 2], [0, -1, 0], [2, 0, 0]].
    let reduced = Matrix3::new(
        0.5 * m[(2, 0)],
        0.5 * m[(2, 1)],
        0.5 * m[(2, 2)],
        -m[(1, 0)],
        -m[(1, 1)],
        -m[(1, 2)],
        0.5 * m[(0, 0)],
        0.5 * m[(0, 1)],
        0.5 * m[(0, 2)],
    );
    let quad = elliptic_eigenvector(&reduced)?;
    let lin = t * quad;
    Conic([quad[0], quad[1], quad[2], lin[0], lin[1], lin[2]])
        .denormalized(mx, my, s)
        .to_ellipse()
}

/// Unit eigenvector of `m` with the largest positive `4 v0 v2 - v1²`.
fn elliptic_eigenvector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let trace = m.trace();
    let minors = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
        + m[(0, 0)] * m[(2, 2)]
        - m[(0, 2)] * m[(2, 0)]
        + m[(1, 1)] * m[(2, 2)]
        - m[(1, 2)] * m[(2, 1)];
    let det = m.determinant();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for lambda in real_cubic_roots(-trace, minors, -det) {
        let svd = (m - Matrix3::identity() * lambda).svd(false, true);
        let Some(v_t) = svd.v_t else {
            continue;
        };
        let k = svd.singular_values.imin();
        let v: Vector3<f64> = v_t.row(k).transpose();
        let constraint = 4.0 * v[0] * v[2] - v[1] * v[1];
        if constraint > 0.0 && best.map_or(true, |(c, _)| constraint > c) {
            best = Some((constraint, v));
        }
    }
    best.map(|(_, v)| v)
}

/// Real roots of the monic cubic `x³ + b x² + c x + d`.
fn real_cubic_roots(b: f64, c: f64, d: f64) -> Vec<f64> {
    let shift = -b / 3.0;
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = 0.25 * q * q + p * p * p / 27.0;
    if disc > 0.0 {
        let root = disc.sqrt();
        let u = (-0.5 * q + root).cbrt();
        let v = (-0.5 * q - root).cbrt();
        return vec![u + v + shift];
    }
    let r = (-p / 3.0).max(0.0).sqrt();
    if r < 1e-300 {
        return vec![shift];
    }
    let phi = (-0.5 * q / (r * r * r)).clamp(-1.0, 1.0).acos();
    (0..3)
        .map(|k| 2.0 * r * ((phi + std::f64::consts::TAU * k as f64) / 3.0).cos() + shift)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn tilted() -> Ellipse {
        Ellipse {
            center: [64.0, 48.0],
            semi_major: 22.0,
            semi_minor: 14.0,
            angle: 0.4,
        }
    }

    #[test]
    fn cubic_roots_match_known_polynomial() {
        // (x - 1)(x - 2)(x + 3) = x³ - 7x + 6
        let mut roots = real_cubic_roots(0.0, -7.0, 6.0);
        roots.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], -3.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn conic_roundtrip_preserves_geometry() {
        let e = tilted();
        let back = e.to_conic().to_ellipse().unwrap();
        assert_relative_eq!(back.center[0], e.center[0], epsilon = 1e-9);
        assert_relative_eq!(back.center[1], e.center[1], epsilon = 1e-9);
        assert_relative_eq!(back.semi_major, e.semi_major, epsilon = 1e-9);
        assert_relative_eq!(back.semi_minor, e.semi_minor, epsilon = 1e-9);
        assert_relative_eq!(back.angle, e.angle, epsilon = 1e-9);
    }

    #[test]
    fn exact_points_recover_ellipse() {
        let e = tilted();
        let fitted = fit_ellipse(&e.sample_points(40)).unwrap();
        assert_relative_eq!(fitted.center[0], e.center[0], epsilon = 1e-6);
        assert_relative_eq!(fitted.center[1], e.center[1], epsilon = 1e-6);
        assert_relative_eq!(fitted.semi_major, e.semi_major, epsilon = 1e-6);
        assert_relative_eq!(fitted.semi_minor, e.semi_minor, epsilon = 1e-6);
        assert_relative_eq!(fitted.angle, e.angle, epsilon = 1e-6);
        assert!(fitted.rms_distance(&e.sample_points(40)) < 1e-6);
    }

    #[test]
    fn noisy_points_stay_close() {
        let e = tilted();
        let mut rng = StdRng::seed_from_u64(99);
        let pts: Vec<[f64; 2]> = e
            .sample_points(120)
            .into_iter()
            .map(|p| [p[0] + rng.gen_range(-0.4..0.4), p[1] + rng.gen_range(-0.4..0.4)])
            .collect();
        let fitted = fit_ellipse(&pts).unwrap();
        assert_relative_eq!(fitted.center[0], e.center[0], epsilon = 0.5);
        assert_relative_eq!(fitted.center[1], e.center[1], epsilon = 0.5);
        assert_relative_eq!(fitted.semi_major, e.semi_major, epsilon = 1.0);
        assert_relative_eq!(fitted.semi_minor, e.semi_minor, epsilon = 1.0);
    }

    #[test]
    fn circle_points_give_equal_axes() {
        let c = Ellipse {
            center: [10.0, 20.0],
            semi_major: 6.0,
            semi_minor: 6.0,
            angle: 0.0,
        };
        let fitted = fit_ellipse(&c.sample_points(36)).unwrap();
        assert_relative_eq!(fitted.center[0], 10.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.center[1], 20.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.semi_major, 6.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.semi_minor, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn too_few_points_fail() {
        assert!(fit_ellipse(&tilted().sample_points(5)).is_none());
    }

    #[test]
    fn sampson_distance_tracks_offset() {
        let e = Ellipse {
            center: [0.0, 0.0],
            semi_major: 10.0,
            semi_minor: 10.0,
            angle: 0.0,
        };
        assert!(e.sampson_distance([10.0, 0.0]) < 1e-12);
        assert_relative_eq!(e.sampson_distance([10.5, 0.0]), 0.5, epsilon = 0.05);
    }
}
