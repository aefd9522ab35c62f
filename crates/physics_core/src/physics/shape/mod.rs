//! Collision shapes
//!
//! A closed set of shape kinds. Convex kinds answer support queries
//! directly; complex kinds (triangle meshes, multi-convex meshes and
//! height fields) are split into convex sub-shapes by a midphase before
//! any narrow-phase test runs.

pub mod mesh;
pub mod primitives;
pub mod support;

use std::sync::Arc;

pub use mesh::{ConvexHull, HeightField, MultiConvexMesh, TriangleMesh};
pub use primitives::Triangle;
pub use support::{support_aabb, PointSupport, Support, SweptConvex, WorldConvex};

use crate::foundation::math::{Aabb, Mat3, Vec3};

/// Every shape kind the narrow phase knows how to dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeKind {
    /// Sphere around the local origin
    Sphere,
    /// Oriented box
    Box,
    /// Capsule along local Y
    Capsule,
    /// Cylinder along local Y
    Cylinder,
    /// Ellipsoid with per-axis radii
    Ellipsoid,
    /// Single convex hull
    ConvexMesh,
    /// Static triangle soup
    TriangleMesh,
    /// Compound of convex hulls
    MultiConvexMesh,
    /// Regular height grid
    HeightField,
}

impl ShapeKind {
    /// Number of kinds, the side length of the dispatch table
    pub const COUNT: usize = 9;

    /// Every kind in dispatch order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Sphere,
        Self::Box,
        Self::Capsule,
        Self::Cylinder,
        Self::Ellipsoid,
        Self::ConvexMesh,
        Self::TriangleMesh,
        Self::MultiConvexMesh,
        Self::HeightField,
    ];

    /// Row or column in the dispatch table
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether the kind must go through a midphase
    pub const fn is_complex(self) -> bool {
        matches!(self, Self::TriangleMesh | Self::MultiConvexMesh | Self::HeightField)
    }
}

/// Collision geometry in the collider's local space
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Sphere of the given radius
    Sphere {
        /// Radius
        radius: f32,
    },
    /// Box with the given half extents
    Box {
        /// Half size on each axis
        half_extents: Vec3,
    },
    /// Segment of length `2 * half_height` along Y swept by `radius`
    Capsule {
        /// Radius of the caps
        radius: f32,
        /// Half the distance between cap centers
        half_height: f32,
    },
    /// Cylinder of height `2 * half_height` along Y
    Cylinder {
        /// Radius
        radius: f32,
        /// Half the height
        half_height: f32,
    },
    /// Ellipsoid with per-axis radii
    Ellipsoid {
        /// Radii along X, Y and Z
        radii: Vec3,
    },
    /// Convex hull
    ConvexMesh(Arc<ConvexHull>),
    /// Triangle soup
    TriangleMesh(Arc<TriangleMesh>),
    /// Compound of hulls
    MultiConvexMesh(Arc<MultiConvexMesh>),
    /// Height grid
    HeightField(Arc<HeightField>),
}

impl Shape {
    /// Sphere shape
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere { radius: radius.abs() }
    }

    /// Box shape from half extents
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::Box { half_extents: half_extents.abs() }
    }

    /// Capsule shape along Y
    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::Capsule { radius: radius.abs(), half_height: half_height.abs() }
    }

    /// Cylinder shape along Y
    pub fn cylinder(radius: f32, half_height: f32) -> Self {
        Self::Cylinder { radius: radius.abs(), half_height: half_height.abs() }
    }

    /// Ellipsoid shape
    pub fn ellipsoid(radii: Vec3) -> Self {
        Self::Ellipsoid { radii: radii.abs() }
    }

    /// Convex hull shape
    pub fn convex_mesh(hull: ConvexHull) -> Self {
        Self::ConvexMesh(Arc::new(hull))
    }

    /// Triangle mesh shape
    pub fn triangle_mesh(mesh: TriangleMesh) -> Self {
        Self::TriangleMesh(Arc::new(mesh))
    }

    /// Multi-convex mesh shape
    pub fn multi_convex_mesh(mesh: MultiConvexMesh) -> Self {
        Self::MultiConvexMesh(Arc::new(mesh))
    }

    /// Height field shape
    pub fn height_field(field: HeightField) -> Self {
        Self::HeightField(Arc::new(field))
    }

    /// Dispatch kind
    pub const fn kind(&self) -> ShapeKind {
        match self {
            Self::Sphere { .. } => ShapeKind::Sphere,
            Self::Box { .. } => ShapeKind::Box,
            Self::Capsule { .. } => ShapeKind::Capsule,
            Self::Cylinder { .. } => ShapeKind::Cylinder,
            Self::Ellipsoid { .. } => ShapeKind::Ellipsoid,
            Self::ConvexMesh(_) => ShapeKind::ConvexMesh,
            Self::TriangleMesh(_) => ShapeKind::TriangleMesh,
            Self::MultiConvexMesh(_) => ShapeKind::MultiConvexMesh,
            Self::HeightField(_) => ShapeKind::HeightField,
        }
    }

    /// Convex view of the whole shape, `None` for complex kinds
    pub fn as_convex(&self) -> Option<LocalConvex<'_>> {
        match self {
            Self::Sphere { radius } => Some(LocalConvex::Sphere(*radius)),
            Self::Box { half_extents } => Some(LocalConvex::Box(*half_extents)),
            Self::Capsule { radius, half_height } => Some(LocalConvex::Capsule {
                radius: *radius,
                half_height: *half_height,
            }),
            Self::Cylinder { radius, half_height } => Some(LocalConvex::Cylinder {
                radius: *radius,
                half_height: *half_height,
            }),
            Self::Ellipsoid { radii } => Some(LocalConvex::Ellipsoid(*radii)),
            Self::ConvexMesh(hull) => Some(LocalConvex::Hull(hull)),
            Self::TriangleMesh(_) | Self::MultiConvexMesh(_) | Self::HeightField(_) => None,
        }
    }

    /// Model space bounds
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Self::Sphere { radius } => Aabb::from_center_half_extents(Vec3::zeros(), Vec3::repeat(*radius)),
            Self::Box { half_extents } => Aabb::from_center_half_extents(Vec3::zeros(), *half_extents),
            Self::Capsule { radius, half_height } => Aabb::from_center_half_extents(
                Vec3::zeros(),
                Vec3::new(*radius, half_height + radius, *radius),
            ),
            Self::Cylinder { radius, half_height } => {
                Aabb::from_center_half_extents(Vec3::zeros(), Vec3::new(*radius, *half_height, *radius))
            }
            Self::Ellipsoid { radii } => Aabb::from_center_half_extents(Vec3::zeros(), *radii),
            Self::ConvexMesh(hull) => hull.local_aabb(),
            Self::TriangleMesh(mesh) => mesh.local_aabb(),
            Self::MultiConvexMesh(mesh) => mesh.local_aabb(),
            Self::HeightField(field) => field.local_aabb(),
        }
    }

    /// Model space center of mass
    pub fn local_center(&self) -> Vec3 {
        match self {
            Self::ConvexMesh(hull) => hull.centroid(),
            Self::MultiConvexMesh(mesh) => mesh.centroid(),
            Self::TriangleMesh(_) | Self::HeightField(_) => self.local_aabb().center(),
            _ => Vec3::zeros(),
        }
    }

    /// Volume after a per-axis scale. Triangle meshes and height fields
    /// have none.
    pub fn volume(&self, scale: &Vec3) -> f32 {
        use std::f32::consts::PI;
        let base = match self {
            Self::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            Self::Box { half_extents } => 8.0 * half_extents.x * half_extents.y * half_extents.z,
            Self::Capsule { radius, half_height } => {
                PI * radius * radius * (2.0 * half_height) + 4.0 / 3.0 * PI * radius.powi(3)
            }
            Self::Cylinder { radius, half_height } => PI * radius * radius * 2.0 * half_height,
            Self::Ellipsoid { radii } => 4.0 / 3.0 * PI * radii.x * radii.y * radii.z,
            Self::ConvexMesh(hull) => hull.volume(),
            Self::MultiConvexMesh(mesh) => mesh.volume(),
            Self::TriangleMesh(_) | Self::HeightField(_) => 0.0,
        };
        base * (scale.x * scale.y * scale.z).abs()
    }

    /// Inertia tensor for a unit mass about the local center, after a
    /// per-axis scale. Hulls and meshes use their bounding box.
    pub fn unit_inertia(&self, scale: &Vec3) -> Mat3 {
        let scale = scale.abs();
        match self {
            Self::Sphere { radius } => ellipsoid_inertia(&(scale * *radius)),
            Self::Box { half_extents } => box_inertia(&half_extents.component_mul(&scale)),
            Self::Ellipsoid { radii } => ellipsoid_inertia(&radii.component_mul(&scale)),
            Self::Cylinder { radius, half_height } => {
                let r = radius * scale.x.max(scale.z);
                cylinder_inertia(r, 2.0 * half_height * scale.y)
            }
            Self::Capsule { radius, half_height } => {
                let r = radius * scale.x.max(scale.z);
                capsule_inertia(r, 2.0 * half_height * scale.y)
            }
            _ => box_inertia(&self.local_aabb().half_extents().component_mul(&scale)),
        }
    }

    /// Number of convex sub-shapes (one for convex kinds)
    pub fn sub_shape_count(&self) -> usize {
        match self {
            Self::TriangleMesh(mesh) => mesh.triangle_count(),
            Self::MultiConvexMesh(mesh) => mesh.hulls().len(),
            Self::HeightField(field) => field.triangle_count(),
            _ => 1,
        }
    }

    /// Convex sub-shape `index`. Convex kinds only have index zero.
    pub fn sub_shape(&self, index: usize) -> Option<LocalConvex<'_>> {
        match self {
            Self::TriangleMesh(mesh) => mesh.triangle(index).map(|t| LocalConvex::Triangle(t.points())),
            Self::HeightField(field) => field.triangle(index).map(|t| LocalConvex::Triangle(t.points())),
            Self::MultiConvexMesh(mesh) => mesh.hulls().get(index).map(LocalConvex::Hull),
            _ if index == 0 => self.as_convex(),
            _ => None,
        }
    }

    /// Midphase: collect sub-shapes whose bounds touch a model space box
    pub fn overlapping_sub_shapes(&self, local_aabb: &Aabb, out: &mut Vec<usize>) {
        match self {
            Self::TriangleMesh(mesh) => mesh.overlapping(local_aabb, out),
            Self::MultiConvexMesh(mesh) => mesh.overlapping(local_aabb, out),
            Self::HeightField(field) => field.overlapping(local_aabb, out),
            _ => {
                if self.local_aabb().overlaps(local_aabb) {
                    out.push(0);
                }
            }
        }
    }
}

fn box_inertia(half: &Vec3) -> Mat3 {
    let (x, y, z) = (half.x * half.x, half.y * half.y, half.z * half.z);
    Mat3::from_diagonal(&Vec3::new(y + z, x + z, x + y)) / 3.0
}

fn ellipsoid_inertia(radii: &Vec3) -> Mat3 {
    let (a, b, c) = (radii.x * radii.x, radii.y * radii.y, radii.z * radii.z);
    Mat3::from_diagonal(&Vec3::new(b + c, a + c, a + b)) / 5.0
}

fn cylinder_inertia(radius: f32, height: f32) -> Mat3 {
    let side = (3.0 * radius * radius + height * height) / 12.0;
    Mat3::from_diagonal(&Vec3::new(side, radius * radius / 2.0, side))
}

fn capsule_inertia(radius: f32, height: f32) -> Mat3 {
    let r2 = radius * radius;
    let cylinder_volume = std::f32::consts::PI * r2 * height;
    let sphere_volume = 4.0 / 3.0 * std::f32::consts::PI * r2 * radius;
    let total = cylinder_volume + sphere_volume;
    if total <= 0.0 {
        return Mat3::zeros();
    }
    let mc = cylinder_volume / total;
    let ms = sphere_volume / total;

    let axial = mc * (r2 / 2.0) + ms * (2.0 * r2 / 5.0);
    let side = mc * (height * height / 12.0 + r2 / 4.0)
        + ms * (2.0 * r2 / 5.0 + height * height / 4.0 + 3.0 * height * radius / 8.0);
    Mat3::from_diagonal(&Vec3::new(side, axial, side))
}

/// A convex shape (or convex piece of a complex shape) in model space
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalConvex<'a> {
    /// Sphere radius
    Sphere(f32),
    /// Box half extents
    Box(Vec3),
    /// Capsule along Y
    Capsule {
        /// Radius
        radius: f32,
        /// Half segment length
        half_height: f32,
    },
    /// Cylinder along Y
    Cylinder {
        /// Radius
        radius: f32,
        /// Half height
        half_height: f32,
    },
    /// Ellipsoid radii
    Ellipsoid(Vec3),
    /// Convex hull
    Hull(&'a ConvexHull),
    /// Mesh or height field triangle
    Triangle([Vec3; 3]),
}

impl LocalConvex<'_> {
    /// Furthest point along `direction` in model space
    pub fn support(&self, direction: &Vec3) -> Vec3 {
        use crate::foundation::math::utils::{attempt_normalize, sign_or_one};
        match self {
            LocalConvex::Sphere(radius) => {
                let (d, length) = attempt_normalize(direction);
                if length == 0.0 {
                    Vec3::new(*radius, 0.0, 0.0)
                } else {
                    d * *radius
                }
            }
            LocalConvex::Box(half) => Vec3::new(
                sign_or_one(direction.x) * half.x,
                sign_or_one(direction.y) * half.y,
                sign_or_one(direction.z) * half.z,
            ),
            LocalConvex::Capsule { radius, half_height } => {
                let (d, length) = attempt_normalize(direction);
                let d = if length == 0.0 { Vec3::y() } else { d };
                Vec3::new(0.0, sign_or_one(direction.y) * half_height, 0.0) + d * *radius
            }
            LocalConvex::Cylinder { radius, half_height } => {
                let planar = Vec3::new(direction.x, 0.0, direction.z);
                let (planar, length) = attempt_normalize(&planar);
                let rim = if length == 0.0 { Vec3::zeros() } else { planar * *radius };
                rim + Vec3::new(0.0, sign_or_one(direction.y) * half_height, 0.0)
            }
            LocalConvex::Ellipsoid(radii) => {
                // Support of a scaled unit sphere: S * normalize(S * d)
                let scaled = radii.component_mul(direction);
                let (n, length) = attempt_normalize(&scaled);
                if length == 0.0 {
                    Vec3::new(radii.x, 0.0, 0.0)
                } else {
                    radii.component_mul(&n)
                }
            }
            LocalConvex::Hull(hull) => hull.support(direction),
            LocalConvex::Triangle(points) => Triangle::from_array(*points).support(direction),
        }
    }

    /// An interior point used to seed GJK
    pub fn center(&self) -> Vec3 {
        match self {
            LocalConvex::Hull(hull) => hull.centroid(),
            LocalConvex::Triangle(points) => (points[0] + points[1] + points[2]) / 3.0,
            _ => Vec3::zeros(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kind_table_is_dense() {
        for (i, kind) in ShapeKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(ShapeKind::ALL.iter().filter(|k| k.is_complex()).count(), 3);
    }

    #[test]
    fn test_supports_of_primitives() {
        let d = Vec3::new(1.0, 1.0, 0.0);
        assert_relative_eq!(
            LocalConvex::Box(Vec3::new(1.0, 2.0, 3.0)).support(&d),
            Vec3::new(1.0, 2.0, 3.0)
        );
        assert_relative_eq!(
            LocalConvex::Capsule { radius: 0.5, half_height: 1.0 }.support(&Vec3::y()),
            Vec3::new(0.0, 1.5, 0.0)
        );
        assert_relative_eq!(
            LocalConvex::Cylinder { radius: 2.0, half_height: 1.0 }.support(&Vec3::new(0.0, -1.0, 1.0)),
            Vec3::new(0.0, -1.0, 2.0)
        );
        assert_relative_eq!(
            LocalConvex::Ellipsoid(Vec3::new(2.0, 1.0, 1.0)).support(&Vec3::x()),
            Vec3::new(2.0, 0.0, 0.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_volume_scales_with_transform() {
        let shape = Shape::cuboid(Vec3::new(0.5, 0.5, 0.5));
        assert_relative_eq!(shape.volume(&Vec3::repeat(1.0)), 1.0);
        assert_relative_eq!(shape.volume(&Vec3::new(2.0, 1.0, 1.0)), 2.0);
        let mesh = Shape::triangle_mesh(TriangleMesh::from_vertices(&[], &[]));
        assert_eq!(mesh.volume(&Vec3::repeat(1.0)), 0.0);
    }

    #[test]
    fn test_sphere_inertia() {
        let inertia = Shape::sphere(1.0).unit_inertia(&Vec3::repeat(1.0));
        assert_relative_eq!(inertia, Mat3::identity() * 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_convex_sub_shape_is_itself() {
        let shape = Shape::sphere(1.0);
        assert_eq!(shape.sub_shape_count(), 1);
        assert!(shape.sub_shape(0).is_some());
        assert!(shape.sub_shape(1).is_none());
    }
}
