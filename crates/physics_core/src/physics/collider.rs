//! # Colliders
//!
//! A collider is one shape attached to a [`PhysicsNode`](super::PhysicsNode).
//! It caches its world bounds, keeps the edges to its contacts and joints,
//! and decides with [`should_collide`] whether a pair is worth testing.

use std::collections::HashSet;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::body::RigidBody;
use super::collision_group::{CollisionGroup, CollisionGroupInstance};
use super::joint::JointEdge;
use super::material::PhysicsMaterial;
use super::node::PhysicsNode;
use super::shape::{support_aabb, LocalConvex, Shape, ShapeKind, WorldConvex};
use crate::foundation::collections::{lexicographic_id, BodyHandle, ColliderHandle, ContactHandle, HandleMap, NodeHandle};
use crate::foundation::math::{Aabb, Mat3, Sphere, Transform, Vec3};

bitflags! {
    /// Collider state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColliderFlags: u32 {
        /// Detects overlap but is never resolved
        const GHOST = 1 << 0;
        /// Has not finished its first step in the broad phase
        const UNINITIALIZED = 1 << 1;
        /// Material density is zero
        const MASSLESS = 1 << 2;
        /// Pair filters reference this collider's owner
        const HAS_PAIR_FILTER = 1 << 3;
        /// Contacts produce events
        const SENDS_EVENTS = 1 << 4;
        /// Currently stored in a broad phase
        const IN_BROAD_PHASE = 1 << 5;
        /// Stored in the dynamic rather than the static broad phase
        const IN_DYNAMIC_BROAD_PHASE = 1 << 6;
    }
}

/// Parameters for creating a collider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColliderDesc {
    /// Geometry
    #[serde(skip, default = "default_shape")]
    pub shape: Shape,
    /// Surface and density
    pub material: PhysicsMaterial,
    /// Collision group
    pub group: CollisionGroup,
    /// Detect but never resolve
    pub ghost: bool,
    /// Produce contact events
    pub sends_events: bool,
}

fn default_shape() -> Shape {
    Shape::sphere(0.5)
}

impl ColliderDesc {
    /// Default material and group around `shape`
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            material: PhysicsMaterial::default(),
            group: CollisionGroup::default_group(),
            ghost: false,
            sends_events: true,
        }
    }

    /// Set the material
    #[must_use]
    pub fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.material = material;
        self
    }

    /// Set the collision group
    #[must_use]
    pub fn with_group(mut self, group: CollisionGroup) -> Self {
        self.group = group;
        self
    }

    /// Make the collider a ghost
    #[must_use]
    pub const fn ghost(mut self) -> Self {
        self.ghost = true;
        self
    }

    /// Enable or disable contact events
    #[must_use]
    pub const fn with_events(mut self, sends_events: bool) -> Self {
        self.sends_events = sends_events;
        self
    }
}

/// One end of a contact as seen from a collider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactEdge {
    /// The contact
    pub contact: ContactHandle,
    /// The collider on the other end
    pub other: ColliderHandle,
}

/// A collidable shape
#[derive(Debug, Clone)]
pub struct Collider {
    pub(crate) id: u32,
    pub(crate) node: NodeHandle,
    pub(crate) active_body: Option<BodyHandle>,
    pub(crate) group_instance: CollisionGroupInstance,
    pub(crate) contact_edges: Vec<ContactEdge>,
    pub(crate) joint_edges: Vec<JointEdge>,
    pub(crate) flags: ColliderFlags,
    shape: Shape,
    material: PhysicsMaterial,
    group: CollisionGroup,
    world_transform: Transform,
    world_aabb: Aabb,
    world_sphere: Sphere,
}

impl Collider {
    pub(crate) fn new(id: u32, node: NodeHandle, desc: ColliderDesc, group_instance: CollisionGroupInstance) -> Self {
        let mut flags = ColliderFlags::UNINITIALIZED;
        flags.set(ColliderFlags::GHOST, desc.ghost);
        flags.set(ColliderFlags::SENDS_EVENTS, desc.sends_events);
        flags.set(ColliderFlags::MASSLESS, desc.material.is_massless());
        Self {
            id,
            node,
            active_body: None,
            group_instance,
            contact_edges: Vec::new(),
            joint_edges: Vec::new(),
            flags,
            shape: desc.shape,
            material: desc.material,
            group: desc.group,
            world_transform: Transform::identity(),
            world_aabb: Aabb::default(),
            world_sphere: Sphere::default(),
        }
    }

    /// Creation order id, used for canonical pair ordering
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Node the collider is attached to
    pub const fn node(&self) -> NodeHandle {
        self.node
    }

    /// Nearest body at or above the collider's node
    pub const fn active_body(&self) -> Option<BodyHandle> {
        self.active_body
    }

    /// Geometry
    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Shape kind tag
    pub const fn kind(&self) -> ShapeKind {
        self.shape.kind()
    }

    /// Surface and density
    pub const fn material(&self) -> &PhysicsMaterial {
        &self.material
    }

    /// Collision group
    pub const fn group(&self) -> &CollisionGroup {
        &self.group
    }

    /// Resolved instance of the group in the space's table
    pub const fn group_instance(&self) -> &CollisionGroupInstance {
        &self.group_instance
    }

    /// State bits
    pub const fn flags(&self) -> ColliderFlags {
        self.flags
    }

    /// Detects but never resolves
    pub const fn is_ghost(&self) -> bool {
        self.flags.contains(ColliderFlags::GHOST)
    }

    /// Contributes no mass
    pub const fn is_massless(&self) -> bool {
        self.flags.contains(ColliderFlags::MASSLESS)
    }

    /// Ghost or massless colliders are never resolved
    pub const fn not_collideable(&self) -> bool {
        self.flags.intersects(ColliderFlags::GHOST.union(ColliderFlags::MASSLESS))
    }

    /// Has not finished its first step yet
    pub const fn is_uninitialized(&self) -> bool {
        self.flags.contains(ColliderFlags::UNINITIALIZED)
    }

    /// Produces contact events
    pub const fn sends_events(&self) -> bool {
        self.flags.contains(ColliderFlags::SENDS_EVENTS)
    }

    /// Pair filters reference this collider's owner
    pub const fn has_pair_filter(&self) -> bool {
        self.flags.contains(ColliderFlags::HAS_PAIR_FILTER)
    }

    /// Number of live contacts
    pub fn contact_count(&self) -> usize {
        self.contact_edges.len()
    }

    /// Live contacts
    pub fn contact_edges(&self) -> &[ContactEdge] {
        &self.contact_edges
    }

    /// Joints, those that forbid collision first
    pub fn joint_edges(&self) -> &[JointEdge] {
        &self.joint_edges
    }

    /// World transform as of the last flush
    pub const fn world_transform(&self) -> &Transform {
        &self.world_transform
    }

    /// World bounds as of the last flush
    pub const fn world_aabb(&self) -> &Aabb {
        &self.world_aabb
    }

    /// World bounding sphere as of the last flush
    pub const fn world_sphere(&self) -> &Sphere {
        &self.world_sphere
    }

    pub(crate) fn set_material(&mut self, material: PhysicsMaterial) {
        self.flags.set(ColliderFlags::MASSLESS, material.is_massless());
        self.material = material;
    }

    pub(crate) fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub(crate) fn set_group(&mut self, group: CollisionGroup, instance: CollisionGroupInstance) {
        self.group = group;
        self.group_instance = instance;
    }

    pub(crate) fn set_flag(&mut self, flag: ColliderFlags, value: bool) {
        self.flags.set(flag, value);
    }

    /// Recompute the cached world transform and bounds
    pub(crate) fn update_world(&mut self, world: &Transform) {
        self.world_transform = *world;
        self.world_aabb = match self.shape.as_convex() {
            Some(convex) => support_aabb(&WorldConvex::new(convex, *world)),
            None => self.shape.local_aabb().transformed(world),
        };
        self.world_sphere = match self.shape {
            Shape::Sphere { radius } => {
                let scale = world.scale.abs();
                Sphere::new(world.position, radius * scale.x.max(scale.y).max(scale.z))
            }
            _ => Sphere::from_aabb(&self.world_aabb),
        };
    }

    /// The collider placed in the world, if its shape is convex
    pub fn world_convex(&self) -> Option<WorldConvex<'_>> {
        self.shape.as_convex().map(|shape| WorldConvex::new(shape, self.world_transform))
    }

    /// A sub-shape of a complex collider placed in the world
    pub fn world_sub_shape(&self, index: usize) -> Option<WorldConvex<'_>> {
        self.shape.sub_shape(index).map(|shape| WorldConvex::new(shape, self.world_transform))
    }

    /// Sub-shapes whose bounds overlap a world box
    pub fn overlapping_sub_shapes(&self, world_aabb: &Aabb, out: &mut Vec<usize>) {
        let local = world_aabb.transformed(&self.world_transform.inverse());
        self.shape.overlapping_sub_shapes(&local, out);
    }

    /// Every convex piece of the collider in the world, with its index
    pub fn convex_pieces(&self) -> Vec<(usize, WorldConvex<'_>)> {
        if let Some(convex) = self.world_convex() {
            return vec![(0, convex)];
        }
        (0..self.shape.sub_shape_count())
            .filter_map(|i| self.world_sub_shape(i).map(|piece| (i, piece)))
            .collect()
    }

    /// World volume
    pub fn compute_volume(&self) -> f32 {
        self.shape.volume(&self.world_transform.scale)
    }

    /// Mass, world center and world inertia about that center
    pub fn mass_contribution(&self) -> Option<(f32, Vec3, Mat3)> {
        if self.is_massless() {
            return None;
        }
        let mass = self.material.density * self.compute_volume();
        if mass <= 0.0 || !mass.is_finite() {
            return None;
        }
        let center = self.world_transform.transform_point(&self.shape.local_center());
        let r = self.world_transform.rotation.to_rotation_matrix().into_inner();
        let inertia = r * self.shape.unit_inertia(&self.world_transform.scale) * r.transpose() * mass;
        Some((mass, center, inertia))
    }

    /// Convex model space geometry, if any
    pub fn local_convex(&self) -> Option<LocalConvex<'_>> {
        self.shape.as_convex()
    }
}

/// Why two colliders are not tested against each other
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Both resolve to the same body, or neither has one
    #[error("The colliders shared a active rigid body and hence don't check against each other.")]
    SharedBody,
    /// Group masks exclude the pair
    #[error("The collision table says to skip detection.")]
    SkipDetection,
    /// An explicit pair filter exists
    #[error("A pair filter has been added to the physics space to ignore collision between these two objects.")]
    PairFilter,
    /// Nothing can move
    #[error("Both objects are asleep or static.")]
    AsleepOrStatic,
    /// A joint connects them without collide-connected
    #[error("The colliders are connected by a joint that says to not collide connected.")]
    JointNoCollide,
    /// A handle did not resolve
    #[error("One of the colliders no longer exists.")]
    Missing,
}

/// Read-only slice of a space needed to decide eligibility
#[derive(Clone, Copy)]
pub struct CollisionView<'a> {
    /// Colliders
    pub colliders: &'a HandleMap<ColliderHandle, Collider>,
    /// Bodies
    pub bodies: &'a HandleMap<BodyHandle, RigidBody>,
    /// Nodes
    pub nodes: &'a HandleMap<NodeHandle, PhysicsNode>,
    /// Packed owner id pairs that must not collide
    pub filtered_pairs: &'a HashSet<u64>,
}

impl CollisionView<'_> {
    /// Walk up through static and kinematic bodies to the nearest body
    /// that can carry the collider
    pub fn resolve_body(&self, body: Option<BodyHandle>) -> Option<BodyHandle> {
        let mut current = body?;
        loop {
            let Some(data) = self.bodies.get(current) else {
                return Some(current);
            };
            match data.parent_body() {
                Some(parent) if !data.is_dynamic() => current = parent,
                _ => return Some(current),
            }
        }
    }

    /// No active body, or a static one
    pub fn is_static(&self, collider: &Collider) -> bool {
        collider
            .active_body
            .and_then(|b| self.bodies.get(b))
            .map_or(true, RigidBody::is_static)
    }

    /// Active body exists and sleeps
    pub fn is_asleep(&self, collider: &Collider) -> bool {
        collider
            .active_body
            .and_then(|b| self.bodies.get(b))
            .is_some_and(RigidBody::is_asleep)
    }

    /// Kinematic active body
    pub fn is_kinematic(&self, collider: &Collider) -> bool {
        collider
            .active_body
            .and_then(|b| self.bodies.get(b))
            .is_some_and(RigidBody::is_kinematic)
    }

    /// Stored in the dynamic broad phase: has a non-static active body
    pub fn in_dynamic_broad_phase(&self, collider: &Collider) -> bool {
        !self.is_static(collider)
    }

    /// Packed owner ids of a pair
    pub fn pair_key(&self, a: &Collider, b: &Collider) -> Option<u64> {
        let owner_a = self.nodes.get(a.node)?.owner_id();
        let owner_b = self.nodes.get(b.node)?.owner_id();
        Some(lexicographic_id(owner_a, owner_b))
    }
}

/// Whether two colliders should be narrow phase tested
pub fn should_collide(view: &CollisionView<'_>, a: ColliderHandle, b: ColliderHandle) -> bool {
    should_collide_with_reason(view, a, b).is_ok()
}

/// Like [`should_collide`] but reports the first rejection.
///
/// The checks run in a fixed order and the first failure wins.
pub fn should_collide_with_reason(
    view: &CollisionView<'_>,
    a: ColliderHandle,
    b: ColliderHandle,
) -> Result<(), RejectionReason> {
    let (Some(collider_a), Some(collider_b)) = (view.colliders.get(a), view.colliders.get(b)) else {
        return Err(RejectionReason::Missing);
    };

    let body_a = view.resolve_body(collider_a.active_body);
    let body_b = view.resolve_body(collider_b.active_body);
    if body_a == body_b {
        return Err(RejectionReason::SharedBody);
    }

    if collider_a.group_instance.skip_detection(&collider_b.group_instance) {
        return Err(RejectionReason::SkipDetection);
    }

    if (collider_a.has_pair_filter() || collider_b.has_pair_filter())
        && view
            .pair_key(collider_a, collider_b)
            .is_some_and(|key| view.filtered_pairs.contains(&key))
    {
        return Err(RejectionReason::PairFilter);
    }

    let resting = |c: &Collider| (view.is_asleep(c) && !c.is_uninitialized()) || view.is_static(c);
    if resting(collider_a) && resting(collider_b) {
        return Err(RejectionReason::AsleepOrStatic);
    }

    for edge in &collider_a.joint_edges {
        if edge.collide_connected {
            break;
        }
        if edge.other == b {
            return Err(RejectionReason::JointNoCollide);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::utils::quat_from_axis_angle;
    use crate::physics::collision_group::{CollisionGroupId, CollisionGroupInstance};
    use approx::assert_relative_eq;

    fn make_collider(shape: Shape, world: &Transform) -> Collider {
        let mut nodes: HandleMap<NodeHandle, ()> = HandleMap::with_key();
        let mut collider = Collider::new(
            1,
            nodes.insert(()),
            ColliderDesc::new(shape),
            CollisionGroupInstance::permissive(CollisionGroupId::from_name("DefaultGroup")),
        );
        collider.update_world(world);
        collider
    }

    #[test]
    fn test_box_aabb_after_rotation() {
        let world = Transform::from_position_rotation(
            Vec3::new(5.0, 0.0, 0.0),
            quat_from_axis_angle(&Vec3::z(), std::f32::consts::FRAC_PI_4),
        );
        let collider = make_collider(Shape::cuboid(Vec3::repeat(1.0)), &world);
        let expected = std::f32::consts::SQRT_2;
        assert_relative_eq!(collider.world_aabb().max.x, 5.0 + expected, epsilon = 1e-4);
        assert_relative_eq!(collider.world_aabb().max.y, expected, epsilon = 1e-4);
        assert_relative_eq!(collider.world_aabb().max.z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_sphere_bounds_are_tight() {
        let world = Transform::from_position(Vec3::new(0.0, 2.0, 0.0)).with_scale(Vec3::new(2.0, 2.0, 2.0));
        let collider = make_collider(Shape::sphere(0.5), &world);
        assert_relative_eq!(collider.world_sphere().radius, 1.0);
        assert_relative_eq!(collider.world_aabb().min.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_mass_contribution_uses_density() {
        let material = PhysicsMaterial::default().with_density(2.0);
        let mut collider = make_collider(Shape::cuboid(Vec3::repeat(0.5)), &Transform::identity());
        collider.set_material(material);
        let (mass, center, _) = collider.mass_contribution().unwrap_or((0.0, Vec3::repeat(1.0), Mat3::zeros()));
        assert_relative_eq!(mass, 2.0, epsilon = 1e-5);
        assert_relative_eq!(center, Vec3::zeros());

        collider.set_material(PhysicsMaterial::default().with_density(0.0));
        assert!(collider.is_massless());
        assert!(collider.not_collideable());
        assert!(collider.mass_contribution().is_none());
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            RejectionReason::SkipDetection.to_string(),
            "The collision table says to skip detection."
        );
        assert_eq!(RejectionReason::AsleepOrStatic.to_string(), "Both objects are asleep or static.");
    }
}
