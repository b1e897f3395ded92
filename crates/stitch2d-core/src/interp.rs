//! Piecewise-linear interpolation of scattered samples.
//!
//! The samples are triangulated with Delaunay; a query point is evaluated
//! barycentrically inside the triangle that contains it. Points outside the
//! convex hull have no value.

use delaunator::{triangulate, Point};

const BARY_EPS: f64 = 1e-10;

#[derive(Clone, Copy, Debug)]
struct Triangle {
    idx: [usize; 3],
    min: [f64; 2],
    max: [f64; 2],
}

/// Linear interpolator over a fixed set of 2D sample sites.
#[derive(Clone, Debug)]
pub struct ScatteredLinear {
    sites: Vec<[f64; 2]>,
    triangles: Vec<Triangle>,
}

impl ScatteredLinear {
    /// Triangulate `sites`. Returns `None` when the sites are collinear or
    /// fewer than three.
    pub fn new(sites: &[[f64; 2]]) -> Option<Self> {
        let points: Vec<Point> = sites.iter().map(|p| Point { x: p[0], y: p[1] }).collect();
        let tri = triangulate(&points);
        if tri.triangles.is_empty() {
            return None;
        }

        let triangles = tri
            .triangles
            .chunks_exact(3)
            .map(|t| {
                let idx = [t[0], t[1], t[2]];
                let mut min = [f64::INFINITY; 2];
                let mut max = [f64::NEG_INFINITY; 2];
                for &k in &idx {
                    for d in 0..2 {
                        min[d] = min[d].min(sites[k][d]);
                        max[d] = max[d].max(sites[k][d]);
                    }
                }
                Triangle { idx, min, max }
            })
            .collect();

        Some(Self {
            sites: sites.to_vec(),
            triangles,
        })
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Barycentric weights of `q` in the first triangle that contains it.
    fn locate(&self, q: [f64; 2]) -> Option<([usize; 3], [f64; 3])> {
        for t in &self.triangles {
            if q[0] < t.min[0] - BARY_EPS
                || q[0] > t.max[0] + BARY_EPS
                || q[1] < t.min[1] - BARY_EPS
                || q[1] > t.max[1] + BARY_EPS
            {
                continue;
            }
            let [a, b, c] = t.idx.map(|k| self.sites[k]);
            let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
            if det.abs() < f64::EPSILON {
                continue;
            }
            let l1 = ((b[1] - c[1]) * (q[0] - c[0]) + (c[0] - b[0]) * (q[1] - c[1])) / det;
            let l2 = ((c[1] - a[1]) * (q[0] - c[0]) + (a[0] - c[0]) * (q[1] - c[1])) / det;
            let l3 = 1.0 - l1 - l2;
            if l1 >= -BARY_EPS && l2 >= -BARY_EPS && l3 >= -BARY_EPS {
                return Some((t.idx, [l1, l2, l3]));
            }
        }
        None
    }

    /// Interpolate `values` (one per site) at `q`.
    pub fn eval(&self, values: &[f64], q: [f64; 2]) -> Option<f64> {
        let (idx, w) = self.locate(q)?;
        Some(w[0] * values[idx[0]] + w[1] * values[idx[1]] + w[2] * values[idx[2]])
    }

    /// Interpolate two value sets at once, sharing the point location.
    pub fn eval_pair(&self, a: &[f64], b: &[f64], q: [f64; 2]) -> Option<(f64, f64)> {
        let (idx, w) = self.locate(q)?;
        let f = |v: &[f64]| w[0] * v[idx[0]] + w[1] * v[idx[1]] + w[2] * v[idx[2]];
        Some((f(a), f(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reproduces_plane_inside_hull() {
        let sites: Vec<[f64; 2]> = (0..4)
            .flat_map(|j| (0..4).map(move |i| [i as f64, j as f64 * 0.5]))
            .collect();
        let values: Vec<f64> = sites.iter().map(|p| 2.0 * p[0] - 3.0 * p[1] + 1.0).collect();
        let interp = ScatteredLinear::new(&sites).expect("triangulation");
        assert!(interp.num_triangles() >= 18);

        for q in [[0.25, 0.1], [1.5, 0.75], [3.0, 1.5], [2.9, 0.01]] {
            let v = interp.eval(&values, q).expect("inside hull");
            assert_relative_eq!(v, 2.0 * q[0] - 3.0 * q[1] + 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn outside_hull_has_no_value() {
        let sites = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let interp = ScatteredLinear::new(&sites).expect("triangle");
        assert!(interp.eval(&[0.0, 1.0, 2.0], [1.0, 1.0]).is_none());
        assert!(interp.eval(&[0.0, 1.0, 2.0], [-0.5, 0.2]).is_none());
    }

    #[test]
    fn collinear_sites_are_rejected() {
        let sites = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        assert!(ScatteredLinear::new(&sites).is_none());
    }
}
