//! # Narrow Phase
//!
//! Exact shape tests, dispatched through a (shape kind, shape kind) table.
//! Spheres against spheres, boxes and capsules are solved analytically;
//! every other convex pair goes through GJK and EPA. Complex shapes are
//! narrowed to their overlapping sub-shapes first, and each sub-shape pair
//! reports its own manifold identified by the sub-shape indices.

use log::trace;

use super::collider::Collider;
use super::contact::{Manifold, ManifoldPoint};
use super::gjk::penetration;
use super::shape::primitives::closest_point_on_segment;
use super::shape::{support_aabb, Shape, ShapeKind, Support, WorldConvex};
use crate::foundation::collections::{ColliderHandle, HandleMap};
use crate::foundation::math::utils::attempt_normalize;
use crate::foundation::math::{Aabb, Vec3};

/// One side of a pair under test
#[derive(Debug, Clone, Copy)]
pub struct PairSide<'a> {
    /// Handle stored in produced manifolds
    pub handle: ColliderHandle,
    /// The collider
    pub collider: &'a Collider,
}

/// Exact test for one pair of shape kinds. Appends manifolds whose first
/// collider is `a` and returns whether anything was found.
pub type ShapeTest = fn(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool;

/// Dispatch table of exact shape tests
#[derive(Debug, Clone)]
pub struct CollisionManager {
    tests: [[ShapeTest; ShapeKind::COUNT]; ShapeKind::COUNT],
}

impl Default for CollisionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionManager {
    /// Table with the built-in tests
    pub fn new() -> Self {
        let mut tests: [[ShapeTest; ShapeKind::COUNT]; ShapeKind::COUNT] =
            [[convex_convex as ShapeTest; ShapeKind::COUNT]; ShapeKind::COUNT];
        for a in ShapeKind::ALL {
            for b in ShapeKind::ALL {
                tests[a.index()][b.index()] = match (a.is_complex(), b.is_complex()) {
                    (false, false) => convex_convex,
                    (true, false) => complex_convex,
                    (false, true) => convex_complex,
                    (true, true) => complex_complex,
                };
            }
        }
        let mut manager = Self { tests };
        manager.register(ShapeKind::Sphere, ShapeKind::Sphere, sphere_sphere);
        manager.register(ShapeKind::Sphere, ShapeKind::Box, sphere_box);
        manager.register(ShapeKind::Box, ShapeKind::Sphere, box_sphere);
        manager.register(ShapeKind::Sphere, ShapeKind::Capsule, sphere_capsule);
        manager.register(ShapeKind::Capsule, ShapeKind::Sphere, capsule_sphere);
        manager
    }

    /// Replace the test for one ordered pair of kinds
    pub fn register(&mut self, a: ShapeKind, b: ShapeKind, test: ShapeTest) {
        self.tests[a.index()][b.index()] = test;
    }

    /// Test two colliders, appending manifolds ordered as `(a, b)`
    pub fn test_collision(
        &self,
        colliders: &HandleMap<ColliderHandle, Collider>,
        a: ColliderHandle,
        b: ColliderHandle,
        out: &mut Vec<Manifold>,
    ) -> bool {
        let (Some(collider_a), Some(collider_b)) = (colliders.get(a), colliders.get(b)) else {
            return false;
        };
        let test = self.tests[collider_a.kind().index()][collider_b.kind().index()];
        let found = test(
            PairSide { handle: a, collider: collider_a },
            PairSide { handle: b, collider: collider_b },
            out,
        );
        if found {
            trace!("narrow phase hit between {a:?} and {b:?}");
        }
        found
    }
}

/// Manifold point for two convex sets, if they overlap
pub fn convex_point<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B) -> Option<ManifoldPoint> {
    let hit = penetration(a, b)?;
    Some(ManifoldPoint::new(hit.point_a, hit.point_b, hit.normal, hit.depth))
}

fn single(a: PairSide<'_>, b: PairSide<'_>, point: Option<ManifoldPoint>, out: &mut Vec<Manifold>) -> bool {
    let Some(point) = point else {
        return false;
    };
    let mut manifold = Manifold::new(a.handle, b.handle, 0);
    manifold.push_point(point);
    out.push(manifold);
    true
}

fn flipped(test: ShapeTest, a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    let start = out.len();
    let found = test(b, a, out);
    for manifold in &mut out[start..] {
        manifold.flip();
    }
    found
}

fn sphere_of(side: &PairSide<'_>) -> (Vec3, f32) {
    let sphere = side.collider.world_sphere();
    (sphere.center, sphere.radius)
}

fn spheres_point(center_a: &Vec3, radius_a: f32, center_b: &Vec3, radius_b: f32) -> Option<ManifoldPoint> {
    let (normal, distance) = attempt_normalize(&(center_b - center_a));
    let normal = if distance == 0.0 { Vec3::y() } else { normal };
    let penetration = radius_a + radius_b - distance;
    if penetration < 0.0 {
        return None;
    }
    Some(ManifoldPoint::new(center_a + normal * radius_a, center_b - normal * radius_b, normal, penetration))
}

/// Sphere against sphere
pub fn sphere_sphere(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    let (center_a, radius_a) = sphere_of(&a);
    let (center_b, radius_b) = sphere_of(&b);
    single(a, b, spheres_point(&center_a, radius_a, &center_b, radius_b), out)
}

/// Sphere against box
pub fn sphere_box(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    let Shape::Box { half_extents } = b.collider.shape() else {
        return convex_convex(a, b, out);
    };
    let (center, radius) = sphere_of(&a);
    let transform = b.collider.world_transform();
    let half = half_extents.component_mul(&transform.scale.abs());
    let local = transform.rotation.inverse() * (center - transform.position);
    let closest = local.sup(&-half).inf(&half);

    let (normal_local, penetration, surface_local) = if closest == local {
        // Center inside: push out through the nearest face
        let depths = half - local.abs();
        let axis = depths.imin();
        let sign = if local[axis] < 0.0 { -1.0 } else { 1.0 };
        let mut normal = Vec3::zeros();
        normal[axis] = -sign;
        let mut surface = local;
        surface[axis] = sign * half[axis];
        (normal, radius + depths[axis], surface)
    } else {
        let (normal, distance) = attempt_normalize(&(closest - local));
        if distance > radius {
            return false;
        }
        (normal, radius - distance, closest)
    };

    let normal = transform.rotation * normal_local;
    let point_b = transform.position + transform.rotation * surface_local;
    let point = ManifoldPoint::new(center + normal * radius, point_b, normal, penetration);
    single(a, b, Some(point), out)
}

/// Box against sphere
pub fn box_sphere(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    flipped(sphere_box, a, b, out)
}

/// Sphere against capsule
pub fn sphere_capsule(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    let Shape::Capsule { radius, half_height } = b.collider.shape() else {
        return convex_convex(a, b, out);
    };
    let (center, sphere_radius) = sphere_of(&a);
    let transform = b.collider.world_transform();
    let scale = transform.scale.abs();
    let axis = transform.rotation * Vec3::new(0.0, half_height * scale.y, 0.0);
    let start = transform.position - axis;
    let end = transform.position + axis;
    let capsule_radius = radius * scale.x.max(scale.z);

    let (closest, _) = closest_point_on_segment(&center, &start, &end);
    single(a, b, spheres_point(&center, sphere_radius, &closest, capsule_radius), out)
}

/// Capsule against sphere
pub fn capsule_sphere(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    flipped(sphere_capsule, a, b, out)
}

/// Any two convex shapes through GJK and EPA
pub fn convex_convex(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    let (Some(shape_a), Some(shape_b)) = (a.collider.world_convex(), b.collider.world_convex()) else {
        return false;
    };
    single(a, b, convex_point(&shape_a, &shape_b), out)
}

pub(crate) fn pieces_overlapping<'a>(side: &PairSide<'a>, bounds: &Aabb) -> Vec<(usize, WorldConvex<'a>)> {
    if let Some(convex) = side.collider.world_convex() {
        return vec![(0, convex)];
    }
    let mut indices = Vec::new();
    side.collider.overlapping_sub_shapes(bounds, &mut indices);
    indices
        .into_iter()
        .filter_map(|i| side.collider.world_sub_shape(i).map(|piece| (i, piece)))
        .collect()
}

pub(crate) fn contact_id(index_a: usize, index_b: usize, a_complex: bool, b_complex: bool) -> u32 {
    let index_a = index_a as u32;
    let index_b = index_b as u32;
    match (a_complex, b_complex) {
        (true, true) => (index_a << 16) | (index_b & 0xFFFF),
        (true, false) => index_a,
        (false, true) => index_b,
        (false, false) => 0,
    }
}

/// Pieces of `a` near `b`, then pieces of `b` near each of those
fn complex_pairs(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    let a_complex = a.collider.kind().is_complex();
    let b_complex = b.collider.kind().is_complex();
    let mut found = false;

    for (index_a, piece_a) in pieces_overlapping(&a, b.collider.world_aabb()) {
        let bounds = support_aabb(&piece_a);
        for (index_b, piece_b) in pieces_overlapping(&b, &bounds) {
            let Some(point) = convex_point(&piece_a, &piece_b) else {
                continue;
            };
            let mut manifold = Manifold::new(a.handle, b.handle, contact_id(index_a, index_b, a_complex, b_complex));
            manifold.push_point(point);
            out.push(manifold);
            found = true;
        }
    }
    found
}

/// Complex shape against a convex one
pub fn complex_convex(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    complex_pairs(a, b, out)
}

/// Convex shape against a complex one
pub fn convex_complex(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    complex_pairs(a, b, out)
}

/// Two complex shapes
pub fn complex_complex(a: PairSide<'_>, b: PairSide<'_>, out: &mut Vec<Manifold>) -> bool {
    complex_pairs(a, b, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Transform;
    use crate::physics::collider::ColliderDesc;
    use crate::physics::collision_group::{CollisionGroupId, CollisionGroupInstance};
    use crate::physics::shape::TriangleMesh;
    use approx::assert_relative_eq;

    fn insert(
        colliders: &mut HandleMap<ColliderHandle, Collider>,
        shape: Shape,
        world: Transform,
    ) -> ColliderHandle {
        let mut nodes: HandleMap<crate::foundation::collections::NodeHandle, ()> = HandleMap::with_key();
        let mut collider = Collider::new(
            colliders.len() as u32 + 1,
            nodes.insert(()),
            ColliderDesc::new(shape),
            CollisionGroupInstance::permissive(CollisionGroupId::from_name("DefaultGroup")),
        );
        collider.update_world(&world);
        colliders.insert(collider)
    }

    #[test]
    fn test_sphere_resting_on_ground_box() {
        let mut colliders = HandleMap::with_key();
        let ground = insert(
            &mut colliders,
            Shape::cuboid(Vec3::new(100.0, 0.5, 100.0)),
            Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
        );
        let ball = insert(&mut colliders, Shape::sphere(1.0), Transform::from_position(Vec3::new(0.0, 0.999, 0.0)));

        let manager = CollisionManager::new();
        let mut out = Vec::new();
        assert!(manager.test_collision(&colliders, ball, ground, &mut out));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].point_count(), 1);
        let point = out[0].points()[0];
        assert_relative_eq!(point.penetration, 0.001, epsilon = 1e-4);
        assert_relative_eq!(point.normal, -Vec3::y(), epsilon = 1e-5);
        assert_eq!(out[0].colliders, [ball, ground]);

        out.clear();
        assert!(manager.test_collision(&colliders, ground, ball, &mut out));
        assert_eq!(out[0].colliders, [ground, ball]);
        assert_relative_eq!(out[0].points()[0].normal, Vec3::y(), epsilon = 1e-5);
    }

    #[test]
    fn test_sphere_inside_box_pushes_out_nearest_face() {
        let mut colliders = HandleMap::with_key();
        let cube = insert(&mut colliders, Shape::cuboid(Vec3::repeat(1.0)), Transform::identity());
        let ball = insert(&mut colliders, Shape::sphere(0.25), Transform::from_position(Vec3::new(0.8, 0.0, 0.0)));

        let mut out = Vec::new();
        assert!(CollisionManager::new().test_collision(&colliders, ball, cube, &mut out));
        let point = out[0].points()[0];
        assert_relative_eq!(point.normal, -Vec3::x(), epsilon = 1e-5);
        assert_relative_eq!(point.penetration, 0.45, epsilon = 1e-5);
    }

    #[test]
    fn test_separated_spheres_miss() {
        let mut colliders = HandleMap::with_key();
        let a = insert(&mut colliders, Shape::sphere(1.0), Transform::identity());
        let b = insert(&mut colliders, Shape::sphere(1.0), Transform::from_position(Vec3::new(2.5, 0.0, 0.0)));
        let mut out = Vec::new();
        assert!(!CollisionManager::new().test_collision(&colliders, a, b, &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn test_gjk_path_for_box_pair() {
        let mut colliders = HandleMap::with_key();
        let a = insert(&mut colliders, Shape::cuboid(Vec3::repeat(1.0)), Transform::identity());
        let b = insert(
            &mut colliders,
            Shape::cuboid(Vec3::repeat(1.0)),
            Transform::from_position(Vec3::new(1.8, 0.0, 0.0)),
        );
        let mut out = Vec::new();
        assert!(CollisionManager::new().test_collision(&colliders, a, b, &mut out));
        let point = out[0].points()[0];
        assert_relative_eq!(point.penetration, 0.2, epsilon = 1e-3);
        assert_relative_eq!(point.normal.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_mesh_manifolds_carry_triangle_index() {
        let vertices = vec![
            Vec3::new(-5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, -5.0),
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::new(-5.0, 0.0, 5.0),
        ];
        let mesh = TriangleMesh::from_vertices(&vertices, &[0, 2, 1, 0, 3, 2]);
        let mut colliders = HandleMap::with_key();
        let floor = insert(&mut colliders, Shape::triangle_mesh(mesh), Transform::identity());
        let ball = insert(&mut colliders, Shape::sphere(0.5), Transform::from_position(Vec3::new(2.0, 0.4, -1.0)));

        let mut out = Vec::new();
        assert!(CollisionManager::new().test_collision(&colliders, ball, floor, &mut out));
        assert!(!out.is_empty());
        for manifold in &out {
            assert_eq!(manifold.colliders, [ball, floor]);
            assert!(manifold.contact_id < 2);
            assert_relative_eq!(manifold.points()[0].penetration, 0.1, epsilon = 1e-2);
        }
    }
}
