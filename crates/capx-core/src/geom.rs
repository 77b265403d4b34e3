//! Geometry primitives: triangular/quadrilateral panels in 3D, segments in 2D.
//!
//! Free functions here are the leaf-level building blocks; [`crate::tree`]
//! wraps them into arena elements. Quad triangulation happens once, at parse
//! time, so the tree only ever stores triangles/segments.

use nalgebra::{Vector2, Vector3};

/// Default threshold below which a triangle is reported as "very thin".
pub const MIN_INTERIOR_ANGLE_DEG: f64 = 5.0;

/// Default threshold below which a 2D segment is reported as degenerate.
pub const MIN_SEGMENT_LENGTH: f64 = 1e-12;

/// A flat triangular panel in 3D, vertex order determines the geometric
/// normal via the right-hand rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub vertices: [Vector3<f64>; 3],
}

impl Triangle {
    #[must_use]
    pub fn new(vertices: [Vector3<f64>; 3]) -> Self {
        Self { vertices }
    }

    /// Centroid (arithmetic mean of vertices).
    #[must_use]
    pub fn centroid(&self) -> Vector3<f64> {
        (self.vertices[0] + self.vertices[1] + self.vertices[2]) / 3.0
    }

    /// Area of the triangle.
    #[must_use]
    pub fn dimension(&self) -> f64 {
        let e1 = self.vertices[1] - self.vertices[0];
        let e2 = self.vertices[2] - self.vertices[0];
        0.5 * e1.cross(&e2).norm()
    }

    /// Longest edge length.
    #[must_use]
    pub fn max_side(&self) -> f64 {
        let a = (self.vertices[1] - self.vertices[0]).norm();
        let b = (self.vertices[2] - self.vertices[1]).norm();
        let c = (self.vertices[0] - self.vertices[2]).norm();
        a.max(b).max(c)
    }

    /// Index of the longest edge, as the vertex opposite it: edge `0` joins
    /// vertices 0-1 (opposite vertex 2), edge `1` joins 1-2 (opposite 0),
    /// edge `2` joins 2-0 (opposite 1).
    #[must_use]
    pub fn longest_edge(&self) -> usize {
        let a = (self.vertices[1] - self.vertices[0]).norm();
        let b = (self.vertices[2] - self.vertices[1]).norm();
        let c = (self.vertices[0] - self.vertices[2]).norm();
        if a >= b && a >= c {
            0
        } else if b >= a && b >= c {
            1
        } else {
            2
        }
    }

    /// Geometric normal from vertex winding order (unnormalized cross product,
    /// normalized here).
    #[must_use]
    pub fn geo_normal(&self) -> Vector3<f64> {
        let e1 = self.vertices[1] - self.vertices[0];
        let e2 = self.vertices[2] - self.vertices[0];
        let n = e1.cross(&e2);
        let len = n.norm();
        if len > 0.0 {
            n / len
        } else {
            Vector3::zeros()
        }
    }

    /// Dielectric normal: `geo_normal`, flipped so it points from the
    /// centroid towards `refpoint`.
    #[must_use]
    pub fn diel_normal(&self, refpoint: Vector3<f64>) -> Vector3<f64> {
        let n = self.geo_normal();
        let to_ref = refpoint - self.centroid();
        if n.dot(&to_ref) >= 0.0 {
            n
        } else {
            -n
        }
    }

    /// `true` if the dielectric reference point lies on the same side as
    /// `geo_normal` (i.e. no flip was needed).
    #[must_use]
    pub fn outperm_normal_dir(&self, refpoint: Vector3<f64>) -> bool {
        let n = self.geo_normal();
        let to_ref = refpoint - self.centroid();
        n.dot(&to_ref) >= 0.0
    }

    /// Smallest interior angle, in degrees.
    #[must_use]
    pub fn min_interior_angle_deg(&self) -> f64 {
        let p = self.vertices;
        let angle_at = |a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>| -> f64 {
            let u = (b - a).normalize();
            let v = (c - a).normalize();
            u.dot(&v).clamp(-1.0, 1.0).acos().to_degrees()
        };
        let a0 = angle_at(p[0], p[1], p[2]);
        let a1 = angle_at(p[1], p[2], p[0]);
        let a2 = angle_at(p[2], p[0], p[1]);
        a0.min(a1).min(a2)
    }

    /// Split the triangle at the midpoint of its longest edge, producing two
    /// child triangles. Preserves winding order of the original.
    #[must_use]
    pub fn subdivide(&self) -> (Triangle, Triangle) {
        let opp = self.longest_edge();
        let (i0, i1, i2) = match opp {
            0 => (0, 1, 2),
            1 => (1, 2, 0),
            _ => (2, 0, 1),
        };
        let v0 = self.vertices[i0];
        let v1 = self.vertices[i1];
        let v2 = self.vertices[i2];
        let mid = (v0 + v1) / 2.0;
        (
            Triangle::new([v0, mid, v2]),
            Triangle::new([mid, v1, v2]),
        )
    }
}

/// A 2D line segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub vertices: [Vector2<f64>; 2],
}

impl Segment {
    #[must_use]
    pub fn new(vertices: [Vector2<f64>; 2]) -> Self {
        Self { vertices }
    }

    #[must_use]
    pub fn centroid(&self) -> Vector2<f64> {
        (self.vertices[0] + self.vertices[1]) / 2.0
    }

    /// Length of the segment (the 2D analogue of `dimension`).
    #[must_use]
    pub fn dimension(&self) -> f64 {
        (self.vertices[1] - self.vertices[0]).norm()
    }

    /// In 2D, `max_side` is just the segment's own length.
    #[must_use]
    pub fn max_side(&self) -> f64 {
        self.dimension()
    }

    /// Geometric normal: the segment direction rotated +90 degrees.
    #[must_use]
    pub fn geo_normal(&self) -> Vector2<f64> {
        let d = self.vertices[1] - self.vertices[0];
        let len = d.norm();
        if len > 0.0 {
            Vector2::new(-d.y, d.x) / len
        } else {
            Vector2::zeros()
        }
    }

    #[must_use]
    pub fn diel_normal(&self, refpoint: Vector2<f64>) -> Vector2<f64> {
        let n = self.geo_normal();
        let to_ref = refpoint - self.centroid();
        if n.dot(&to_ref) >= 0.0 {
            n
        } else {
            -n
        }
    }

    #[must_use]
    pub fn outperm_normal_dir(&self, refpoint: Vector2<f64>) -> bool {
        let n = self.geo_normal();
        let to_ref = refpoint - self.centroid();
        n.dot(&to_ref) >= 0.0
    }

    /// Split at the midpoint.
    #[must_use]
    pub fn subdivide(&self) -> (Segment, Segment) {
        let mid = self.centroid();
        (
            Segment::new([self.vertices[0], mid]),
            Segment::new([mid, self.vertices[1]]),
        )
    }
}

/// `true` if four coplanar-ish points (in order around the quad) are convex.
#[must_use]
fn is_convex_quad(v: &[Vector3<f64>; 4], normal: Vector3<f64>) -> bool {
    let mut sign = 0.0_f64;
    for i in 0..4 {
        let a = v[i];
        let b = v[(i + 1) % 4];
        let c = v[(i + 2) % 4];
        let cross = (b - a).cross(&(c - b));
        let s = cross.dot(&normal);
        if sign == 0.0 {
            sign = s.signum();
        } else if s.signum() != 0.0 && s.signum() != sign {
            return false;
        }
    }
    true
}

/// Check coplanarity of four points within `tol` (max distance of any point
/// from the plane defined by the first three, relative to the quad's scale).
#[must_use]
pub fn quad_is_planar(v: &[Vector3<f64>; 4], tol: f64) -> bool {
    let n = (v[1] - v[0]).cross(&(v[2] - v[0]));
    let n_norm = n.norm();
    if n_norm == 0.0 {
        return true;
    }
    let n = n / n_norm;
    let scale = (v[1] - v[0]).norm().max((v[2] - v[0]).norm()).max(1e-12);
    let dist = (v[3] - v[0]).dot(&n).abs();
    dist <= tol * scale
}

/// Triangulate a quad by splitting along its shorter diagonal. Appropriate
/// for near-rectangular convex quads.
#[must_use]
pub fn triangulate_quad_short_diagonal(v: [Vector3<f64>; 4]) -> [Triangle; 2] {
    let d02 = (v[2] - v[0]).norm();
    let d13 = (v[3] - v[1]).norm();
    if d02 <= d13 {
        [
            Triangle::new([v[0], v[1], v[2]]),
            Triangle::new([v[0], v[2], v[3]]),
        ]
    } else {
        [
            Triangle::new([v[0], v[1], v[3]]),
            Triangle::new([v[1], v[2], v[3]]),
        ]
    }
}

/// Triangulate a quad with a constrained-Delaunay-like criterion: of the two
/// possible diagonals, pick the one whose resulting triangle pair has the
/// larger minimum angle (the standard 2-triangle Delaunay flip criterion),
/// appropriate for concave or skewed quads where the short-diagonal heuristic
/// can produce a sliver or an inverted triangle.
#[must_use]
pub fn triangulate_quad_delaunay(v: [Vector3<f64>; 4]) -> [Triangle; 2] {
    let split_02 = [
        Triangle::new([v[0], v[1], v[2]]),
        Triangle::new([v[0], v[2], v[3]]),
    ];
    let split_13 = [
        Triangle::new([v[0], v[1], v[3]]),
        Triangle::new([v[1], v[2], v[3]]),
    ];

    let min_angle = |tris: &[Triangle; 2]| -> f64 {
        tris[0]
            .min_interior_angle_deg()
            .min(tris[1].min_interior_angle_deg())
    };

    let degenerate = |tris: &[Triangle; 2]| -> bool {
        tris.iter().any(|t| t.dimension() <= 0.0)
    };

    match (degenerate(&split_02), degenerate(&split_13)) {
        (true, true) => split_02,
        (true, false) => split_13,
        (false, true) => split_02,
        (false, false) => {
            if min_angle(&split_02) >= min_angle(&split_13) {
                split_02
            } else {
                split_13
            }
        }
    }
}

/// Pick a triangulation strategy for a quad: short-diagonal for convex
/// near-rectangular quads, Delaunay-style for concave/skewed ones.
#[must_use]
pub fn triangulate_quad(v: [Vector3<f64>; 4]) -> [Triangle; 2] {
    let normal = (v[1] - v[0]).cross(&(v[2] - v[0]));
    if is_convex_quad(&v, normal) {
        triangulate_quad_short_diagonal(v)
    } else {
        triangulate_quad_delaunay(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v3(x: f64, y: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn unit_right_triangle_area_and_normal() {
        let t = Triangle::new([v3(0.0, 0.0, 0.0), v3(1.0, 0.0, 0.0), v3(0.0, 1.0, 0.0)]);
        assert_relative_eq!(t.dimension(), 0.5, epsilon = 1e-12);
        let n = t.geo_normal();
        assert_relative_eq!(n, v3(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn subdivide_preserves_total_area() {
        let t = Triangle::new([v3(0.0, 0.0, 0.0), v3(2.0, 0.0, 0.0), v3(0.0, 3.0, 0.0)]);
        let (a, b) = t.subdivide();
        assert_relative_eq!(a.dimension() + b.dimension(), t.dimension(), epsilon = 1e-9);
    }

    #[test]
    fn thin_triangle_is_reported() {
        let t = Triangle::new([v3(0.0, 0.0, 0.0), v3(10.0, 0.0, 0.0), v3(10.0, 0.1, 0.0)]);
        assert!(t.min_interior_angle_deg() < MIN_INTERIOR_ANGLE_DEG);
    }

    #[test]
    fn degenerate_segment_is_reported() {
        let s = Segment::new([Vector2::new(0.0, 0.0), Vector2::new(1e-14, 0.0)]);
        assert!(s.dimension() < MIN_SEGMENT_LENGTH);
    }

    #[test]
    fn segment_subdivide_preserves_length() {
        let s = Segment::new([Vector2::new(0.0, 0.0), Vector2::new(4.0, 0.0)]);
        let (a, b) = s.subdivide();
        assert_relative_eq!(a.dimension() + b.dimension(), s.dimension(), epsilon = 1e-12);
    }

    #[test]
    fn square_quad_short_diagonal_preserves_area() {
        let v = [
            v3(0.0, 0.0, 0.0),
            v3(1.0, 0.0, 0.0),
            v3(1.0, 1.0, 0.0),
            v3(0.0, 1.0, 0.0),
        ];
        let [t0, t1] = triangulate_quad(v);
        assert_relative_eq!(t0.dimension() + t1.dimension(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn planarity_check_flags_warped_quad() {
        let v = [
            v3(0.0, 0.0, 0.0),
            v3(1.0, 0.0, 0.0),
            v3(1.0, 1.0, 0.0),
            v3(0.0, 1.0, 1.0),
        ];
        assert!(!quad_is_planar(&v, 1e-6));
    }
}
