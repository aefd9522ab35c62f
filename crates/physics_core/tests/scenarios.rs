//! End-to-end scenarios run through a whole space

use approx::assert_relative_eq;
use physics_core::foundation::collections::unpack_lexicographic_id;
use physics_core::physics::shape::{ConvexHull, MultiConvexMesh};
use physics_core::prelude::*;

fn weightless() -> PhysicsSpace {
    PhysicsSpace::new(PhysicsSpaceConfig::default().with_gravity(Vec3::zeros()))
}

fn static_collider(space: &mut PhysicsSpace, position: Vec3, shape: Shape) -> (NodeHandle, ColliderHandle) {
    let node = space.create_node(None, Transform::from_position(position)).unwrap();
    let collider = space.add_collider(node, ColliderDesc::new(shape)).unwrap();
    (node, collider)
}

fn dynamic_collider(
    space: &mut PhysicsSpace,
    position: Vec3,
    desc: ColliderDesc,
    velocity: Vec3,
) -> (NodeHandle, ColliderHandle, BodyHandle) {
    let node = space.create_node(None, Transform::from_position(position)).unwrap();
    let collider = space.add_collider(node, desc).unwrap();
    let body = space.add_rigid_body(node, &RigidBodyDesc::dynamic().with_velocity(velocity)).unwrap();
    (node, collider, body)
}

fn thin_wall(space: &mut PhysicsSpace) -> ColliderHandle {
    static_collider(space, Vec3::zeros(), Shape::cuboid(Vec3::new(0.025, 5.0, 5.0))).1
}

#[test]
fn test_sphere_resting_just_inside_ground() {
    let mut space = PhysicsSpace::default();
    let (_, ground) = static_collider(&mut space, Vec3::new(0.0, -50.0, 0.0), Shape::cuboid(Vec3::new(1000.0, 50.0, 1000.0)));
    let (_, ball) = static_collider(&mut space, Vec3::new(0.0, 0.999, 0.0), Shape::sphere(1.0));

    let results = space.sweep_collider(ball, Vec3::zeros(), 1.0 / 60.0, &CastFilter::new());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].other, ground);
    assert_relative_eq!(results[0].time, 0.0);
    assert_relative_eq!(results[0].penetration, 0.001, epsilon = 1.0e-4);
    assert_relative_eq!(results[0].normal, Vec3::y(), epsilon = 1.0e-5);
}

#[test]
fn test_resting_sphere_contact_has_a_single_point() {
    let mut space = PhysicsSpace::new(PhysicsSpaceConfig::default().with_gravity(Vec3::zeros()).with_allow_sleep(false));
    static_collider(&mut space, Vec3::new(0.0, -50.0, 0.0), Shape::cuboid(Vec3::new(1000.0, 50.0, 1000.0)));
    dynamic_collider(&mut space, Vec3::new(0.0, 0.999, 0.0), ColliderDesc::new(Shape::sphere(1.0)), Vec3::zeros());

    space.update(1.0 / 60.0);
    let (_, contact) = space.contacts().iter().next().expect("the sphere should touch the ground");
    assert_eq!(space.contacts().len(), 1);
    assert_eq!(contact.manifold().point_count(), 1);
    assert_relative_eq!(contact.manifold().max_penetration(), 0.001, epsilon = 1.0e-4);
}

#[test]
fn test_skip_detection_groups_never_reach_the_narrow_phase() {
    let debris = CollisionGroup::new("Debris");
    let shrapnel = CollisionGroup::new("Shrapnel");
    let mut table = CollisionTable::new("Explosions");
    table.register_group(&debris).unwrap();
    table.register_group(&shrapnel).unwrap();
    table.add_filter(CollisionFilter::new(&debris, &shrapnel, FilterFlags::SKIP_DETECTION)).unwrap();

    let mut space = weightless();
    space.set_collision_table(table);
    let (a, _, _) = dynamic_collider(
        &mut space,
        Vec3::new(-0.2, 0.0, 0.0),
        ColliderDesc::new(Shape::sphere(0.5)).with_group(debris),
        Vec3::new(1.0, 0.0, 0.0),
    );
    let (b, _, _) = dynamic_collider(
        &mut space,
        Vec3::new(0.2, 0.0, 0.0),
        ColliderDesc::new(Shape::sphere(0.5)).with_group(shrapnel),
        Vec3::new(-1.0, 0.0, 0.0),
    );

    for _ in 0..5 {
        space.update(1.0 / 60.0);
        assert!(space.statistics().candidate_pairs >= 1);
        assert_eq!(space.statistics().tested_pairs, 0);
        assert!(space.contacts().is_empty());
    }
    assert_eq!(space.why_are_they_not_colliding(a, b), "The collision table says to skip detection.");
}

#[test]
fn test_fast_sphere_is_caught_before_the_thin_wall() {
    let mut space = weightless();
    let wall = thin_wall(&mut space);
    let (node, ball, _) = dynamic_collider(
        &mut space,
        Vec3::new(-1.0, 0.0, 0.0),
        ColliderDesc::new(Shape::sphere(0.1)),
        Vec3::new(100.0, 0.0, 0.0),
    );

    let dt = 1.0 / 60.0;
    let sweep = space.sweep_collider(ball, Vec3::new(100.0, 0.0, 0.0), dt, &CastFilter::new());
    assert_eq!(sweep.len(), 1);
    assert_eq!(sweep[0].other, wall);
    assert!(sweep[0].time > 0.0 && sweep[0].time < dt);

    space.update(dt);
    assert_eq!(space.statistics().continuous_hits, 1);
    for _ in 0..10 {
        space.update(dt);
    }
    let x = space.world_transform(node).unwrap().position.x;
    assert!(x < 0.0, "sphere tunneled to x = {x}");
}

#[test]
fn test_fast_compound_is_caught_before_the_thin_wall() {
    let mut space = weightless();
    let wall = thin_wall(&mut space);
    let hulls = MultiConvexMesh::new(vec![ConvexHull::cuboid(Vec3::repeat(0.1))]);
    let velocity = Vec3::new(100.0, 0.0, 0.0);
    let (node, crate_box, _) = dynamic_collider(
        &mut space,
        Vec3::new(-1.0, 0.0, 0.0),
        ColliderDesc::new(Shape::multi_convex_mesh(hulls)),
        velocity,
    );

    let dt = 1.0 / 60.0;
    let sweep = space.sweep_collider(crate_box, velocity, dt, &CastFilter::new());
    assert_eq!(sweep.len(), 1);
    assert_eq!(sweep[0].other, wall);
    assert_relative_eq!(sweep[0].time, 0.875 / 100.0, epsilon = 1.0e-4);

    space.update(dt);
    assert_eq!(space.statistics().continuous_hits, 1);
    for _ in 0..10 {
        space.update(dt);
    }
    let x = space.world_transform(node).unwrap().position.x;
    assert!(x < 0.0, "compound tunneled to x = {x}");
}

#[test]
fn test_destroying_an_owner_drops_its_pair_filters() {
    let mut space = PhysicsSpace::default();
    let (first, _) = static_collider(&mut space, Vec3::zeros(), Shape::sphere(1.0));
    let (second, _) = static_collider(&mut space, Vec3::new(5.0, 0.0, 0.0), Shape::sphere(1.0));
    let (third, _) = static_collider(&mut space, Vec3::new(10.0, 0.0, 0.0), Shape::sphere(1.0));
    space.add_pair_filter(first, second).unwrap();
    space.add_pair_filter(first, third).unwrap();
    space.add_pair_filter(second, third).unwrap();

    let owner = space.node(first).unwrap().owner_id();
    space.destroy_node(first).unwrap();

    assert_eq!(space.filtered_pairs().len(), 1);
    for &key in space.filtered_pairs() {
        let (low, high) = unpack_lexicographic_id(key);
        assert!(low != owner && high != owner);
    }
}
