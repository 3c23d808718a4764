//! Peak extraction on signed response maps.

use crate::frame::Frame;

/// Local maximum of a response map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Peak {
    pub xy: [u32; 2],
    pub value: f32,
}

/// 8-neighbourhood local maxima with value above `min_value`, strongest first.
///
/// Plateaus keep only their first pixel in row-major order.
pub(crate) fn local_maxima(map: &Frame, min_value: f32) -> Vec<Peak> {
    let (w, h) = map.dimensions();
    let data = map.as_raw();
    let stride = w as usize;
    let mut peaks = Vec::new();
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let idx = y as usize * stride + x as usize;
            let v = data[idx];
            if v <= min_value {
                continue;
            }
            let mut is_max = true;
            'nbhd: for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let nidx = ny as usize * stride + nx as usize;
                    let nv = data[nidx];
                    if nv > v || (nv == v && nidx < idx) {
                        is_max = false;
                        break 'nbhd;
                    }
                }
            }
            if is_max {
                peaks.push(Peak {
                    xy: [x as u32, y as u32],
                    value: v,
                });
            }
        }
    }
    peaks.sort_by(|a, b| b.value.total_cmp(&a.value));
    peaks
}

/// Vertex offset of the parabola through `(-1, l)`, `(0, c)`, `(1, r)`,
/// clamped to half a sample. Works for maxima and minima alike.
#[inline]
pub(crate) fn parabolic_offset(l: f32, c: f32, r: f32) -> f32 {
    let denom = l - 2.0 * c + r;
    if denom.abs() <= f32::EPSILON {
        return 0.0;
    }
    (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
}

/// Sub-pixel extremum position around integer pixel `xy`.
pub(crate) fn refine_subpixel(map: &Frame, xy: [u32; 2]) -> [f64; 2] {
    let (w, h) = map.dimensions();
    let [x, y] = xy;
    let at = |px: u32, py: u32| map.get_pixel(px, py)[0];
    let c = at(x, y);
    let ox = if x > 0 && x + 1 < w {
        parabolic_offset(at(x - 1, y), c, at(x + 1, y))
    } else {
        0.0
    };
    let oy = if y > 0 && y + 1 < h {
        parabolic_offset(at(x, y - 1), c, at(x, y + 1))
    } else {
        0.0
    };
    [x as f64 + ox as f64, y as f64 + oy as f64]
}

/// Mean of the 3x3 neighbourhood around `xy`, clipped at the border.
pub(crate) fn neighbourhood_mean(image: &Frame, xy: [u32; 2]) -> f32 {
    let (w, h) = image.dimensions();
    let (mut acc, mut n) = (0.0f32, 0u32);
    for y in xy[1].saturating_sub(1)..=(xy[1] + 1).min(h - 1) {
        for x in xy[0].saturating_sub(1)..=(xy[0] + 1).min(w - 1) {
            acc += image.get_pixel(x, y)[0];
            n += 1;
        }
    }
    acc / n.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    #[test]
    fn maxima_are_sorted_and_thresholded() {
        let mut m = Frame::new(9, 7);
        m.put_pixel(2, 2, Luma([3.0]));
        m.put_pixel(6, 4, Luma([5.0]));
        m.put_pixel(7, 4, Luma([1.0]));
        m.put_pixel(0, 6, Luma([0.2]));
        let peaks = local_maxima(&m, 0.5);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].xy, [6, 4]);
        assert_eq!(peaks[1].xy, [2, 2]);
    }

    #[test]
    fn plateau_yields_single_peak() {
        let mut m = Frame::new(5, 5);
        m.put_pixel(2, 2, Luma([1.0]));
        m.put_pixel(3, 2, Luma([1.0]));
        let peaks = local_maxima(&m, 0.0);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].xy, [2, 2]);
    }

    #[test]
    fn parabola_recovers_vertex() {
        let f = |x: f32| 4.0 - (x - 0.3) * (x - 0.3);
        assert_relative_eq!(parabolic_offset(f(-1.0), f(0.0), f(1.0)), 0.3, epsilon = 1e-5);
        let g = |x: f32| (x + 0.2) * (x + 0.2);
        assert_relative_eq!(parabolic_offset(g(-1.0), g(0.0), g(1.0)), -0.2, epsilon = 1e-5);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn subpixel_at_border_keeps_integer_coordinate() {
        let mut m = Frame::new(4, 4);
        m.put_pixel(0, 1, Luma([2.0]));
        m.put_pixel(0, 2, Luma([1.0]));
        let p = refine_subpixel(&m, [0, 1]);
        assert_eq!(p[0], 0.0);
        assert!(p[1] > 1.0 && p[1] < 1.5);
    }
}
