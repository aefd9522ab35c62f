//! Math utilities and types
//!
//! Thin aliases over nalgebra plus the bounding volumes and query
//! primitives shared by the broad phase, narrow phase and casts.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector3};

use serde::{Deserialize, Serialize};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Builder-style scale override
    #[must_use]
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Rotation and scale as a single linear map
    pub fn linear(&self) -> Mat3 {
        self.rotation.to_rotation_matrix().into_inner() * Mat3::from_diagonal(&self.scale)
    }

    /// Apply this transform to a point
    pub fn transform_point(&self, point: &Vec3) -> Vec3 {
        self.position + self.rotation * self.scale.component_mul(point)
    }

    /// Apply rotation and scale to a vector
    pub fn transform_vector(&self, vector: &Vec3) -> Vec3 {
        self.rotation * self.scale.component_mul(vector)
    }

    /// Bring a world point into this transform's local space
    pub fn inverse_transform_point(&self, point: &Vec3) -> Vec3 {
        let local = self.rotation.inverse() * (point - self.position);
        local.component_div(&safe_scale(&self.scale))
    }

    /// Combine this transform with a child transform (`self` is the parent)
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            position: self.position + self.rotation * (self.scale.component_mul(&other.position)),
            rotation: self.rotation * other.rotation,
            scale: self.scale.component_mul(&other.scale),
        }
    }

    /// Get the inverse transform
    pub fn inverse(&self) -> Self {
        let scale = safe_scale(&self.scale);
        let inv_scale = Vec3::new(1.0 / scale.x, 1.0 / scale.y, 1.0 / scale.z);
        let inv_rotation = self.rotation.inverse();
        let inv_position = inv_scale.component_mul(&(inv_rotation * -self.position));

        Self {
            position: inv_position,
            rotation: inv_rotation,
            scale: inv_scale,
        }
    }
}

fn safe_scale(scale: &Vec3) -> Vec3 {
    scale.map(|s| if s.abs() < f32::EPSILON { f32::EPSILON } else { s })
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::zeros(), Vec3::zeros())
    }
}

impl Aabb {
    /// Create a new AABB from min and max points
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given half extents
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest box containing every point, or `None` for an empty iterator
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut aabb = Self::new(first, first);
        for point in iter {
            aabb.expand_to_point(point);
        }
        Some(aabb)
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the half extents of the AABB
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Volume of the box
    pub fn volume(&self) -> f32 {
        let size = self.max - self.min;
        size.x * size.y * size.z
    }

    /// Grow the box to include a point
    pub fn expand_to_point(&mut self, point: &Vec3) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    /// Union of two boxes
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Box grown uniformly by `margin`
    #[must_use]
    pub fn expanded(&self, margin: f32) -> Self {
        let m = Vec3::repeat(margin);
        Self::new(self.min - m, self.max + m)
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: &Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if this AABB fully contains another
    pub fn contains(&self, other: &Self) -> bool {
        self.contains_point(&other.min) && self.contains_point(&other.max)
    }

    /// Check if this AABB intersects another AABB
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Box bounding this one after being carried through `transform`
    #[must_use]
    pub fn transformed(&self, transform: &Transform) -> Self {
        let center = transform.transform_point(&self.center());
        let linear = transform.linear().abs();
        let half = linear * self.half_extents();
        Self::from_center_half_extents(center, half)
    }

    /// Closest point inside the box to `point`
    pub fn closest_point(&self, point: &Vec3) -> Vec3 {
        point.sup(&self.min).inf(&self.max)
    }

    /// Slab test; returns the entry distance along the ray when it hits.
    /// A ray starting inside the box reports zero.
    pub fn intersect_ray(&self, ray_origin: &Vec3, ray_dir: &Vec3) -> Option<f32> {
        let mut t_min = 0.0_f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = ray_origin[axis];
            let dir = ray_dir[axis];
            if dir.abs() < 1e-12 {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t1 = (self.min[axis] - origin) * inv;
            let mut t2 = (self.max[axis] - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sphere {
    /// Center in world space
    pub center: Vec3,
    /// Radius
    pub radius: f32,
}

impl Sphere {
    /// Create a sphere
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Sphere enclosing an AABB
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self::new(aabb.center(), aabb.half_extents().norm())
    }

    /// Sphere–sphere overlap
    pub fn overlaps(&self, other: &Self) -> bool {
        let r = self.radius + other.radius;
        (self.center - other.center).norm_squared() <= r * r
    }

    /// Sphere–box overlap
    pub fn overlaps_aabb(&self, aabb: &Aabb) -> bool {
        let closest = aabb.closest_point(&self.center);
        (closest - self.center).norm_squared() <= self.radius * self.radius
    }

    /// Bounding box of the sphere
    pub fn to_aabb(&self) -> Aabb {
        Aabb::from_center_half_extents(self.center, Vec3::repeat(self.radius))
    }
}

/// Half-line used for ray casts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Starting point
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
}

impl Ray {
    /// Create a ray; the direction is normalized when possible
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        let (direction, _) = utils::attempt_normalize(&direction);
        Self { origin, direction }
    }

    /// Point at parameter `t`
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Finite line segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Start point
    pub start: Vec3,
    /// End point
    pub end: Vec3,
}

impl Segment {
    /// Create a segment
    pub const fn new(start: Vec3, end: Vec3) -> Self {
        Self { start, end }
    }

    /// Length of the segment
    pub fn length(&self) -> f32 {
        (self.end - self.start).norm()
    }
}

/// Swept sphere between two points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    /// First cap center
    pub start: Vec3,
    /// Second cap center
    pub end: Vec3,
    /// Radius around the segment
    pub radius: f32,
}

impl Capsule {
    /// Create a capsule
    pub const fn new(start: Vec3, end: Vec3, radius: f32) -> Self {
        Self { start, end, radius }
    }

    /// Bounding box of the capsule
    pub fn to_aabb(&self) -> Aabb {
        let r = Vec3::repeat(self.radius);
        Aabb::new(self.start.inf(&self.end) - r, self.start.sup(&self.end) + r)
    }
}

/// Plane `normal · x = distance`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal
    pub normal: Vec3,
    /// Offset along the normal
    pub distance: f32,
}

impl Plane {
    /// Plane through `point` facing `normal`
    pub fn from_point_normal(point: &Vec3, normal: &Vec3) -> Self {
        let (normal, _) = utils::attempt_normalize(normal);
        Self {
            normal,
            distance: normal.dot(point),
        }
    }

    /// Signed distance of a point to the plane
    pub fn signed_distance(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }
}

/// Convex volume bounded by inward-facing planes
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    /// Planes with normals pointing into the volume
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Create a frustum from six inward-facing planes
    pub const fn new(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Box-shaped frustum, handy for selection queries
    pub fn from_aabb(aabb: &Aabb) -> Self {
        let axes = [Vec3::x(), Vec3::y(), Vec3::z()];
        let planes = [
            Plane::from_point_normal(&aabb.min, &axes[0]),
            Plane::from_point_normal(&aabb.max, &-axes[0]),
            Plane::from_point_normal(&aabb.min, &axes[1]),
            Plane::from_point_normal(&aabb.max, &-axes[1]),
            Plane::from_point_normal(&aabb.min, &axes[2]),
            Plane::from_point_normal(&aabb.max, &-axes[2]),
        ];
        Self { planes }
    }

    /// Conservative box test: rejects only boxes fully outside one plane
    pub fn overlaps_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();
        self.planes.iter().all(|plane| {
            let radius = half.dot(&plane.normal.abs());
            plane.signed_distance(&center) >= -radius
        })
    }
}

/// Math utility functions
pub mod utils {
    use super::{Mat3, Quat, Vec3};

    /// Normalize if the length is meaningful, returning the original length.
    /// Degenerate vectors come back unchanged with a zero length.
    pub fn attempt_normalize(v: &Vec3) -> (Vec3, f32) {
        let length = v.norm();
        if length > 1e-8 {
            (v / length, length)
        } else {
            (*v, 0.0)
        }
    }

    /// Any unit vector perpendicular to `v`
    pub fn any_perpendicular(v: &Vec3) -> Vec3 {
        let axis = if v.x.abs() < 0.57 { Vec3::x() } else { Vec3::y() };
        let (perp, _) = attempt_normalize(&v.cross(&axis));
        perp
    }

    /// Rotation of `angle` radians about a unit `axis`
    pub fn quat_from_axis_angle(axis: &Vec3, angle: f32) -> Quat {
        if angle == 0.0 || axis.norm_squared() < 1e-12 {
            return Quat::identity();
        }
        Quat::from_axis_angle(&nalgebra::Unit::new_normalize(*axis), angle)
    }

    /// Skew-symmetric cross product matrix
    pub fn skew(v: &Vec3) -> Mat3 {
        Mat3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
    }

    /// Sign that treats zero as positive
    pub fn sign_or_one(value: f32) -> f32 {
        if value < 0.0 { -1.0 } else { 1.0 }
    }
}
