//! Support mappings in world space
//!
//! GJK, EPA, casts and time of impact only ever ask a shape for its
//! furthest point along a direction and for some interior point.

use super::LocalConvex;
use crate::foundation::math::{Aabb, Quat, Transform, Vec3};

/// A convex set described by its support function
pub trait Support {
    /// Furthest point of the set along `direction`
    fn support(&self, direction: &Vec3) -> Vec3;

    /// Any point strictly inside the set
    fn center(&self) -> Vec3;
}

/// A convex shape placed in the world by a transform (scale included)
#[derive(Debug, Clone, Copy)]
pub struct WorldConvex<'a> {
    /// Model space geometry
    pub shape: LocalConvex<'a>,
    /// Model to world transform
    pub transform: Transform,
}

impl<'a> WorldConvex<'a> {
    /// Place `shape` with `transform`
    pub const fn new(shape: LocalConvex<'a>, transform: Transform) -> Self {
        Self { shape, transform }
    }
}

impl Support for WorldConvex<'_> {
    fn support(&self, direction: &Vec3) -> Vec3 {
        // For x -> p + R S x, the support along d is p + R S s(S R^T d)
        let local_dir = self.transform.scale.component_mul(&(self.transform.rotation.inverse() * direction));
        let local = self.shape.support(&local_dir);
        self.transform.transform_point(&local)
    }

    fn center(&self) -> Vec3 {
        self.transform.transform_point(&self.shape.center())
    }
}

/// A world convex carried along a rigid motion: translated by
/// `delta_position` and rotated by `delta_rotation` about `pivot`.
#[derive(Debug, Clone, Copy)]
pub struct SweptConvex<'a> {
    /// Shape at the start of the motion
    pub base: WorldConvex<'a>,
    /// Point the rotation is applied around
    pub pivot: Vec3,
    /// Translation accumulated so far
    pub delta_position: Vec3,
    /// Rotation accumulated so far
    pub delta_rotation: Quat,
}

impl<'a> SweptConvex<'a> {
    /// Motion-free wrapper
    pub fn at_rest(base: WorldConvex<'a>, pivot: Vec3) -> Self {
        Self {
            base,
            pivot,
            delta_position: Vec3::zeros(),
            delta_rotation: Quat::identity(),
        }
    }
}

impl Support for SweptConvex<'_> {
    fn support(&self, direction: &Vec3) -> Vec3 {
        let local_dir = self.delta_rotation.inverse() * direction;
        let point = self.base.support(&local_dir);
        self.pivot + self.delta_position + self.delta_rotation * (point - self.pivot)
    }

    fn center(&self) -> Vec3 {
        let point = self.base.center();
        self.pivot + self.delta_position + self.delta_rotation * (point - self.pivot)
    }
}

/// A bare point, used for rays and for sweeping a point through a shape
#[derive(Debug, Clone, Copy)]
pub struct PointSupport(pub Vec3);

impl Support for PointSupport {
    fn support(&self, _direction: &Vec3) -> Vec3 {
        self.0
    }

    fn center(&self) -> Vec3 {
        self.0
    }
}

/// Exact bounds of a support mapping from its six axis extremes
pub fn support_aabb<S: Support + ?Sized>(shape: &S) -> Aabb {
    let mut min = Vec3::zeros();
    let mut max = Vec3::zeros();
    for axis in 0..3 {
        let mut direction = Vec3::zeros();
        direction[axis] = 1.0;
        max[axis] = shape.support(&direction)[axis];
        min[axis] = shape.support(&-direction)[axis];
    }
    Aabb::new(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::utils::quat_from_axis_angle;
    use approx::assert_relative_eq;

    #[test]
    fn test_scaled_rotated_box_support() {
        let transform = Transform::from_position_rotation(
            Vec3::new(1.0, 0.0, 0.0),
            quat_from_axis_angle(&Vec3::z(), std::f32::consts::FRAC_PI_2),
        )
        .with_scale(Vec3::new(2.0, 1.0, 1.0));
        let shape = WorldConvex::new(LocalConvex::Box(Vec3::repeat(1.0)), transform);

        // Local X (scaled to 2) now points along world Y
        let top = shape.support(&Vec3::y());
        assert_relative_eq!(top.y, 2.0, epsilon = 1e-5);
        let right = shape.support(&Vec3::x());
        assert_relative_eq!(right.x, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_swept_support_translates_and_rotates() {
        let base = WorldConvex::new(LocalConvex::Box(Vec3::new(2.0, 0.5, 0.5)), Transform::identity());
        let mut swept = SweptConvex::at_rest(base, Vec3::zeros());
        swept.delta_position = Vec3::new(0.0, 3.0, 0.0);
        swept.delta_rotation = quat_from_axis_angle(&Vec3::z(), std::f32::consts::FRAC_PI_2);

        let top = swept.support(&Vec3::y());
        assert_relative_eq!(top.y, 5.0, epsilon = 1e-5);
        assert_relative_eq!(swept.center(), Vec3::new(0.0, 3.0, 0.0), epsilon = 1e-5);
    }
}
