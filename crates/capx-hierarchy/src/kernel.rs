//! Potential kernel: the oracle `P(a, b)` the mesher and link generator both
//! call to estimate the potential panel `a` induces at panel `b`. Injected as
//! a trait so the reference Laplace-kernel implementation can be swapped for
//! a test double in unit tests without dragging geometry through them.

use capx_core::{Element, Panel};
use nalgebra::Vector3;
use num_complex::Complex64;

/// Panel separation below which the analytic far-field formula is no longer
/// trustworthy and a near-field quadrature estimate must be used instead.
pub const NEAR_FIELD_RATIO: f64 = 3.0;

/// Oracle for the potential one element induces at another. Implementations
/// may be as simple as a closed-form free-space Green's function or as
/// involved as a tabulated measured response; the hierarchy and link
/// generator only ever see this trait.
pub trait PotentialKernel: Send + Sync {
    /// Potential induced at `target` by a unit source at `source`.
    fn potential(&self, source: &Element, target: &Element) -> Complex64;

    /// `true` if `source` and `target` are far enough apart that the
    /// analytic estimate is considered accurate; used by the mesher and link
    /// generator to decide whether further subdivision is required.
    fn is_far_field(&self, source: &Element, target: &Element) -> bool {
        let d = (target.centroid - source.centroid).norm();
        let scale = source.max_side.max(target.max_side);
        scale <= 0.0 || d >= NEAR_FIELD_RATIO * scale
    }
}

/// Free-space Laplace kernel: `1/(4*pi*r)` in 3D, `-ln(r)/(2*pi)` in 2D,
/// selected by which [`Panel`] variant the elements carry. Falls back to a
/// two-point midpoint quadrature when elements are flagged near-field.
#[derive(Clone, Copy, Debug, Default)]
pub struct LaplaceKernel;

impl LaplaceKernel {
    fn point_potential_3d(r: f64) -> f64 {
        if r <= 0.0 {
            0.0
        } else {
            1.0 / (4.0 * std::f64::consts::PI * r)
        }
    }

    fn point_potential_2d(r: f64) -> f64 {
        if r <= 0.0 {
            0.0
        } else {
            -r.ln() / (2.0 * std::f64::consts::PI)
        }
    }

    fn quadrature_points(elem: &Element) -> Vec<Vector3<f64>> {
        match &elem.panel {
            Some(Panel::Triangle3D(t)) => {
                let c = t.centroid();
                t.vertices
                    .iter()
                    .map(|v| (v + c) / 2.0)
                    .collect()
            }
            Some(Panel::Segment2D(s)) => {
                let c = s.centroid();
                s.vertices
                    .iter()
                    .map(|v| {
                        let p = (v + c) / 2.0;
                        Vector3::new(p.x, p.y, 0.0)
                    })
                    .collect()
            }
            None => vec![elem.centroid],
        }
    }

    fn is_2d(elem: &Element) -> bool {
        matches!(elem.panel, Some(Panel::Segment2D(_)))
    }
}

impl PotentialKernel for LaplaceKernel {
    fn potential(&self, source: &Element, target: &Element) -> Complex64 {
        let is_2d = Self::is_2d(source) || Self::is_2d(target);

        if self.is_far_field(source, target) {
            let r = (target.centroid - source.centroid).norm();
            let value = if is_2d {
                Self::point_potential_2d(r) * source.dimension
            } else {
                Self::point_potential_3d(r) * source.dimension
            };
            return Complex64::new(value, 0.0);
        }

        // Near-field: average the point kernel over a handful of quadrature
        // points on the source panel rather than relying on a single
        // centroid-to-centroid distance, which is unstable at close range.
        let points = Self::quadrature_points(source);
        let n = points.len().max(1) as f64;
        let sum: f64 = points
            .iter()
            .map(|p| {
                let r = (target.centroid - p).norm();
                if is_2d {
                    Self::point_potential_2d(r)
                } else {
                    Self::point_potential_3d(r)
                }
            })
            .sum();
        Complex64::new(sum / n * source.dimension, 0.0)
    }
}
