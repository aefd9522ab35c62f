//! Primitive geometry helpers
//!
//! Triangles are the sub-shapes of triangle meshes and height fields, so
//! they carry the ray test, closest point query and support function used
//! by the midphase and by casts.

use crate::foundation::math::{Aabb, Ray, Vec3};

/// A triangle in whatever space its vertices were given in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// First vertex
    pub v0: Vec3,
    /// Second vertex
    pub v1: Vec3,
    /// Third vertex
    pub v2: Vec3,
}

impl Triangle {
    /// Creates a new triangle
    pub const fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self { v0, v1, v2 }
    }

    /// Creates a triangle from a vertex array
    pub const fn from_array(points: [Vec3; 3]) -> Self {
        Self::new(points[0], points[1], points[2])
    }

    /// Vertices as an array
    pub const fn points(&self) -> [Vec3; 3] {
        [self.v0, self.v1, self.v2]
    }

    /// Unit normal (right-hand rule). Degenerate triangles return +Y.
    pub fn normal(&self) -> Vec3 {
        let n = (self.v1 - self.v0).cross(&(self.v2 - self.v0));
        let length = n.norm();
        if length > 1e-12 {
            n / length
        } else {
            Vec3::y()
        }
    }

    /// Center of the three vertices
    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Tight bounding box
    pub fn aabb(&self) -> Aabb {
        Aabb::new(
            self.v0.inf(&self.v1).inf(&self.v2),
            self.v0.sup(&self.v1).sup(&self.v2),
        )
    }

    /// Vertex furthest along `direction`
    pub fn support(&self, direction: &Vec3) -> Vec3 {
        let d0 = self.v0.dot(direction);
        let d1 = self.v1.dot(direction);
        let d2 = self.v2.dot(direction);
        if d0 >= d1 && d0 >= d2 {
            self.v0
        } else if d1 >= d2 {
            self.v1
        } else {
            self.v2
        }
    }

    /// Möller-Trumbore ray-triangle intersection.
    ///
    /// Returns `(t, u, v)` where `t` is the distance along the ray and
    /// `u`, `v` are the barycentric weights of `v1` and `v2`. Both faces
    /// are hit.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(f32, f32, f32)> {
        const EPSILON: f32 = 0.000_001;

        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;

        let h = ray.direction.cross(&edge2);
        let a = edge1.dot(&h);

        // Parallel to the plane
        if a.abs() < EPSILON {
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin - self.v0;
        let u = f * s.dot(&h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(&edge1);
        let v = f * ray.direction.dot(&q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(&q);
        (t >= 0.0).then_some((t, u, v))
    }

    /// Closest point on the triangle to `point` (Ericson, RTCD 5.1.5)
    pub fn closest_point(&self, point: &Vec3) -> Vec3 {
        let (closest, _) = closest_point_on_triangle(point, &self.v0, &self.v1, &self.v2);
        closest
    }
}

/// Closest point on triangle `abc` to `p` with its barycentric weights
pub fn closest_point_on_triangle(p: &Vec3, a: &Vec3, b: &Vec3, c: &Vec3) -> (Vec3, [f32; 3]) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, [0.0, 1.0 - w, w]);
    }

    let sum = va + vb + vc;
    if sum.abs() < f32::MIN_POSITIVE {
        return (*a, [1.0, 0.0, 0.0]);
    }
    let denom = 1.0 / sum;
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}

/// Closest point on segment `ab` to `p` with its barycentric weights
pub fn closest_point_on_segment(p: &Vec3, a: &Vec3, b: &Vec3) -> (Vec3, [f32; 2]) {
    let ab = b - a;
    let length_sq = ab.norm_squared();
    if length_sq < f32::MIN_POSITIVE {
        return (*a, [1.0, 0.0]);
    }
    let t = ((p - a).dot(&ab) / length_sq).clamp(0.0, 1.0);
    (a + ab * t, [1.0 - t, t])
}

/// Ray against a sphere. Returns the entry distance and the surface normal.
/// A ray starting inside reports the exit point.
pub fn intersect_ray_sphere(ray: &Ray, center: &Vec3, radius: f32) -> Option<(f32, Vec3)> {
    let oc = ray.origin - center;

    // |origin + t*direction - center|^2 = radius^2
    let a = ray.direction.dot(&ray.direction);
    let b = 2.0 * oc.dot(&ray.direction);
    let c = oc.dot(&oc) - radius * radius;

    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 || a <= 0.0 {
        return None;
    }

    let sqrt_discriminant = discriminant.sqrt();
    let t1 = (-b - sqrt_discriminant) / (2.0 * a);
    let t2 = (-b + sqrt_discriminant) / (2.0 * a);

    let t = if t1 >= 0.0 {
        t1
    } else if t2 >= 0.0 {
        t2
    } else {
        return None;
    };

    let (normal, _) = crate::foundation::math::utils::attempt_normalize(&(ray.point_at(t) - center));
    Some((t, normal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle() -> Triangle {
        Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        )
    }

    #[test]
    fn test_triangle_ray_hit_and_miss() {
        let tri = unit_triangle();
        let hit = tri.intersect_ray(&Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::new(0.0, 0.0, -1.0)));
        let (t, u, v) = hit.unwrap_or_default();
        assert_relative_eq!(t, 1.0, epsilon = 1e-5);
        assert_relative_eq!(u, 0.25, epsilon = 1e-5);
        assert_relative_eq!(v, 0.25, epsilon = 1e-5);

        let miss = tri.intersect_ray(&Ray::new(Vec3::new(2.0, 2.0, 1.0), Vec3::new(0.0, 0.0, -1.0)));
        assert!(miss.is_none());
    }

    #[test]
    fn test_closest_point_regions() {
        let tri = unit_triangle();
        assert_relative_eq!(tri.closest_point(&Vec3::new(-1.0, -1.0, 0.0)), Vec3::zeros());
        assert_relative_eq!(
            tri.closest_point(&Vec3::new(0.5, -2.0, 3.0)),
            Vec3::new(0.5, 0.0, 0.0)
        );
        assert_relative_eq!(
            tri.closest_point(&Vec3::new(0.2, 0.2, 5.0)),
            Vec3::new(0.2, 0.2, 0.0)
        );
    }

    #[test]
    fn test_barycentric_weights_sum_to_one() {
        let (point, weights) = closest_point_on_triangle(
            &Vec3::new(0.3, 0.3, 1.0),
            &Vec3::zeros(),
            &Vec3::x(),
            &Vec3::y(),
        );
        assert_relative_eq!(weights.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        let rebuilt = Vec3::x() * weights[1] + Vec3::y() * weights[2];
        assert_relative_eq!(point, rebuilt, epsilon = 1e-6);
    }

    #[test]
    fn test_ray_sphere() {
        let ray = Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::x());
        let (t, normal) = intersect_ray_sphere(&ray, &Vec3::zeros(), 1.0).unwrap_or((0.0, Vec3::zeros()));
        assert_relative_eq!(t, 4.0, epsilon = 1e-5);
        assert_relative_eq!(normal, -Vec3::x(), epsilon = 1e-5);
        assert!(intersect_ray_sphere(&ray, &Vec3::new(0.0, 3.0, 0.0), 1.0).is_none());
    }
}
