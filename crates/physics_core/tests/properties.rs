//! Properties the pipeline keeps across arbitrary edits and frames

use approx::assert_relative_eq;
use physics_core::foundation::logging;
use physics_core::foundation::math::utils::quat_from_axis_angle;
use physics_core::prelude::*;

const DT: f32 = 1.0 / 60.0;

fn weightless_awake() -> PhysicsSpace {
    PhysicsSpace::new(
        PhysicsSpaceConfig::default()
            .with_gravity(Vec3::zeros())
            .with_allow_sleep(false),
    )
}

/// A dynamic ghost ball overlapping a static ball: the contact exists every
/// step but the solver never pushes the pair apart
fn ghost_overlap(space: &mut PhysicsSpace) -> (NodeHandle, ColliderHandle) {
    let anchor = space.create_node(None, Transform::identity()).unwrap();
    space.add_collider(anchor, ColliderDesc::new(Shape::sphere(1.0))).unwrap();

    let node = space.create_node(None, Transform::from_position(Vec3::new(1.5, 0.0, 0.0))).unwrap();
    let ghost = space.add_collider(node, ColliderDesc::new(Shape::sphere(1.0)).ghost()).unwrap();
    space.add_rigid_body(node, &RigidBodyDesc::dynamic()).unwrap();
    (node, ghost)
}

fn contact_of(event: &PhysicsEvent) -> ContactHandle {
    event.contact().unwrap()
}

#[test]
fn test_world_bounds_contain_every_corner_after_edits() {
    logging::init_for_tests();
    let mut space = PhysicsSpace::default();
    let root = space
        .create_node(None, Transform::from_position_rotation(Vec3::new(3.0, 1.0, 0.0), quat_from_axis_angle(&Vec3::y(), 0.7)))
        .unwrap();
    let child = space.create_node(Some(root), Transform::from_position(Vec3::new(0.0, 2.0, 1.0))).unwrap();
    let half = Vec3::new(0.5, 1.5, 0.25);
    let collider = space.add_collider(child, ColliderDesc::new(Shape::cuboid(half))).unwrap();

    let edits = [
        Transform::from_position_rotation(Vec3::new(-2.0, 0.0, 4.0), quat_from_axis_angle(&Vec3::x(), 1.1)),
        Transform::from_position_rotation(Vec3::zeros(), quat_from_axis_angle(&Vec3::new(1.0, 1.0, 0.0).normalize(), -0.4))
            .with_scale(Vec3::new(2.0, 1.0, 1.0)),
    ];
    for edit in edits {
        space.set_local_transform(root, edit).unwrap();
        let aabb = space.world_aabb(collider).unwrap().expanded(1.0e-4);
        let world = space.world_transform(child).unwrap();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { -half.x } else { half.x },
                if i & 2 == 0 { -half.y } else { half.y },
                if i & 4 == 0 { -half.z } else { half.z },
            );
            assert!(aabb.contains_point(&world.transform_point(&corner)), "corner {i} escaped {aabb:?}");
        }
    }
}

#[test]
fn test_colliders_of_one_body_never_collide() {
    let mut space = PhysicsSpace::default();
    let root = space.create_node(None, Transform::identity()).unwrap();
    space.add_rigid_body(root, &RigidBodyDesc::dynamic()).unwrap();
    let left = space.create_node(Some(root), Transform::from_position(Vec3::new(-0.25, 0.0, 0.0))).unwrap();
    let right = space.create_node(Some(root), Transform::from_position(Vec3::new(0.25, 0.0, 0.0))).unwrap();
    space.add_collider(left, ColliderDesc::new(Shape::sphere(0.5))).unwrap();
    space.add_collider(right, ColliderDesc::new(Shape::sphere(0.5))).unwrap();

    space.update(DT);
    assert!(space.contacts().is_empty());
    assert_eq!(
        space.why_are_they_not_colliding(left, right),
        "The colliders shared a active rigid body and hence don't check against each other."
    );
}

#[test]
fn test_reconfiguring_groups_twice_changes_nothing() {
    let groups: Vec<CollisionGroup> = ["Player", "Enemy", "Pickup", "Projectile"].into_iter().map(CollisionGroup::new).collect();
    let mut table = CollisionTable::new("Gameplay");
    for group in &groups {
        table.register_group(group).unwrap();
    }
    table.add_filter(CollisionFilter::new(&groups[0], &groups[2], FilterFlags::SKIP_RESOLUTION)).unwrap();
    table.add_filter(CollisionFilter::new(&groups[3], &groups[3], FilterFlags::SKIP_DETECTION)).unwrap();

    table.reconfigure_groups();
    let once = table.clone();
    table.reconfigure_groups();
    assert_eq!(table, once);
    for group in &groups {
        assert_eq!(table.group_instance(group.id()), once.group_instance(group.id()));
    }
}

#[test]
fn test_persisting_contact_keeps_its_identity() {
    let mut space = weightless_awake();
    ghost_overlap(&mut space);
    let recorder = EventRecorder::new();
    space.register_global_handler(Box::new(recorder.clone()));

    for _ in 0..5 {
        space.update(DT);
    }
    assert_eq!(recorder.count(PhysicsEventType::CollisionStarted), 1);
    assert_eq!(recorder.count(PhysicsEventType::CollisionPersisted), 4);
    assert_eq!(recorder.count(PhysicsEventType::CollisionEnded), 0);

    let started = contact_of(&recorder.of_type(PhysicsEventType::CollisionStarted)[0].event);
    for persisted in recorder.of_type(PhysicsEventType::CollisionPersisted) {
        assert_eq!(contact_of(&persisted.event), started);
    }
    assert_eq!(space.contacts().len(), 1);
    assert!(space.contact(started).is_some_and(|c| c.is_active() && c.skips_resolution()));
}

#[test]
fn test_ended_contacts_are_readable_until_the_step_finishes() {
    let mut space = weightless_awake();
    let (node, _) = ghost_overlap(&mut space);
    let recorder = EventRecorder::new();
    space.register_handler(PhysicsEventType::CollisionEnded, Box::new(recorder.clone()));

    space.update(DT);
    assert_eq!(space.contacts().len(), 1);
    space.set_local_transform(node, Transform::from_position(Vec3::new(50.0, 0.0, 0.0))).unwrap();
    space.update(DT);

    let ended = recorder.of_type(PhysicsEventType::CollisionEnded);
    assert_eq!(ended.len(), 1);
    let manifold = ended[0].manifold.as_ref().expect("the ended contact was freed before its handlers ran");
    assert!(manifold.point_count() > 0);
    assert!(space.contact(contact_of(&ended[0].event)).is_none());
    assert!(space.contacts().is_empty());
    assert_eq!(space.statistics().destroyed_contacts, 1);
}

#[test]
fn test_full_contact_pool_drops_the_extra_manifold() {
    let mut space = PhysicsSpace::new(
        PhysicsSpaceConfig::default()
            .with_gravity(Vec3::zeros())
            .with_allow_sleep(false)
            .with_contact_pool_capacity(1),
    );
    for x in [0.0, 20.0] {
        let anchor = space.create_node(None, Transform::from_position(Vec3::new(x, 0.0, 0.0))).unwrap();
        space.add_collider(anchor, ColliderDesc::new(Shape::sphere(1.0))).unwrap();
        let node = space.create_node(None, Transform::from_position(Vec3::new(x + 1.5, 0.0, 0.0))).unwrap();
        space.add_collider(node, ColliderDesc::new(Shape::sphere(1.0)).ghost()).unwrap();
        space.add_rigid_body(node, &RigidBodyDesc::dynamic()).unwrap();
    }

    space.update(DT);
    assert_eq!(space.statistics().manifolds, 2);
    assert_eq!(space.contacts().len(), 1);
    space.update(DT);
    assert_eq!(space.contacts().len(), 1);
}

#[test]
fn test_faster_approach_never_hits_later() {
    let mut space = PhysicsSpace::default();
    let wall = space.create_node(None, Transform::identity()).unwrap();
    space.add_collider(wall, ColliderDesc::new(Shape::cuboid(Vec3::new(0.025, 5.0, 5.0)))).unwrap();
    let node = space.create_node(None, Transform::from_position(Vec3::new(-1.0, 0.0, 0.0))).unwrap();
    let ball = space.add_collider(node, ColliderDesc::new(Shape::sphere(0.1))).unwrap();

    let mut previous = f32::INFINITY;
    for speed in [60.0, 100.0, 150.0, 200.0] {
        let hits = space.sweep_collider(ball, Vec3::new(speed, 0.0, 0.0), DT, &CastFilter::new());
        assert_eq!(hits.len(), 1, "no impact at speed {speed}");
        assert!(hits[0].time <= previous + 1.0e-6);
        assert_relative_eq!(hits[0].time, 0.875 / speed, epsilon = 1.0e-3);
        previous = hits[0].time;
    }
}

#[test]
fn test_joint_without_collide_connected_blocks_contacts() {
    let mut space = weightless_awake();
    let first = space.create_node(None, Transform::identity()).unwrap();
    let a = space.add_collider(first, ColliderDesc::new(Shape::sphere(1.0))).unwrap();
    space.add_rigid_body(first, &RigidBodyDesc::dynamic()).unwrap();
    let second = space.create_node(None, Transform::from_position(Vec3::new(1.5, 0.0, 0.0))).unwrap();
    let b = space.add_collider(second, ColliderDesc::new(Shape::sphere(1.0))).unwrap();
    space.add_rigid_body(second, &RigidBodyDesc::dynamic()).unwrap();

    let joint = space.add_joint(a, b, false).unwrap();
    space.update(DT);
    assert!(space.contacts().is_empty());

    space.set_joint_collide_connected(joint, true).unwrap();
    space.update(DT);
    assert_eq!(space.contacts().len(), 1);
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "Object mutated after destruction"))]
fn test_mutating_a_destroyed_node_is_a_consistency_error() {
    let mut space = PhysicsSpace::default();
    let node = space.create_node(None, Transform::identity()).unwrap();
    space.destroy_node(node).unwrap();

    let result = space.set_local_transform(node, Transform::from_position(Vec3::x()));
    assert!(matches!(result, Err(PhysicsError::DestroyedOwner(_))));
}


