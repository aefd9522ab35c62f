//! # Physics Space
//!
//! A space owns one self-contained world: the node hierarchy with its
//! colliders, bodies and joints, the contacts between them, and the
//! collaborators that step it (broad phase, narrow phase, island solver).
//!
//! ## Deferred mutation
//!
//! Writes never touch cached world state directly. They queue an action on
//! the affected node and the space commits all queued actions together in
//! [`PhysicsSpace::flush`]. A sub-step flushes three times, and every query
//! flushes before it reads anything, so callers always observe a consistent
//! world.
//!
//! ## Teardown
//!
//! Destroying a node unlinks its colliders and bodies at once and emits the
//! end events of their contacts. Broad phase entries and node memory are
//! reclaimed lazily at the next flush.

mod casts;
mod diagnostics;
mod filters;
mod flush;
mod step;

use std::collections::{HashMap, HashSet};
use std::fmt;

use bitflags::bitflags;
use log::{debug, error, info, warn};

pub use step::StepStatistics;

use super::body::{DynamicState, Mode2D, RigidBody, RigidBodyDesc};
use super::broad_phase::{BroadPhase, BroadPhasePackage};
use super::collider::{Collider, ColliderDesc, ColliderFlags, CollisionView};
use super::collision_group::{CollisionGroup, CollisionGroupInstance, CollisionTable};
use super::contact::{Contact, ContactManager};
use super::effects::{GravityEffect, PhysicsEffect, VehicleHook};
use super::joint::{insert_joint_edge, remove_joint_edge, Joint, JointEdge};
use super::material::PhysicsMaterial;
use super::narrow_phase::CollisionManager;
use super::node::{BroadPhaseAction, NodeQueue, PendingAction, PhysicsNode, TransformSource};
use super::shape::Shape;
use super::solver::{Island, IslandManager, IslandSolver, SolverDebugFlags};
use crate::config::{PhysicsSpaceConfig, SolverConfig, MAX_SUB_STEPS, MIN_SUB_STEPS};
use crate::error::{PhysicsError, PhysicsResult};
use crate::events::{PhysicsEvent, PhysicsEventHandler, PhysicsEventManager, PhysicsEventType};
use crate::foundation::collections::{
    unpack_lexicographic_id, BodyHandle, ColliderHandle, ContactHandle, HandleMap, IdAllocator, JointHandle,
    NodeHandle,
};
use crate::foundation::math::{Aabb, Transform, Vec3};

bitflags! {
    /// Space state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SpaceFlags: u32 {
        /// Editor preview: transforms are published but nothing simulates
        const PREVIEW = 1 << 0;
        /// Event handlers are running
        const DISPATCHING = 1 << 1;
    }
}

/// One simulated world
pub struct PhysicsSpace {
    config: PhysicsSpaceConfig,
    flags: SpaceFlags,
    debug_flags: SolverDebugFlags,
    collision_table: CollisionTable,

    nodes: HandleMap<NodeHandle, PhysicsNode>,
    colliders: HandleMap<ColliderHandle, Collider>,
    bodies: HandleMap<BodyHandle, RigidBody>,
    joints: HandleMap<JointHandle, Joint>,
    queue: NodeQueue,
    owner_ids: IdAllocator,
    collider_ids: IdAllocator,
    retired_proxies: Vec<ColliderHandle>,

    broad_phase: Box<dyn BroadPhase>,
    narrow_phase: CollisionManager,
    contacts: ContactManager,
    islands: Box<dyn IslandManager>,
    events: PhysicsEventManager,

    filtered_pairs: HashSet<u64>,
    gravity: GravityEffect,
    effects: Vec<Box<dyn PhysicsEffect>>,
    hierarchy_effects: HashMap<NodeHandle, Vec<Box<dyn PhysicsEffect>>>,
    vehicles: Vec<(BodyHandle, Box<dyn VehicleHook>)>,
    moved_kinematics: HashSet<BodyHandle>,
    statistics: StepStatistics,
}

impl fmt::Debug for PhysicsSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsSpace")
            .field("flags", &self.flags)
            .field("nodes", &self.nodes.len())
            .field("colliders", &self.colliders.len())
            .field("bodies", &self.bodies.len())
            .field("contacts", &self.contacts.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Default for PhysicsSpace {
    fn default() -> Self {
        Self::new(PhysicsSpaceConfig::default())
    }
}

impl PhysicsSpace {
    /// Create a space with the default broad phase and solver
    pub fn new(config: PhysicsSpaceConfig) -> Self {
        Self::with_collaborators(config, Box::new(BroadPhasePackage::new()), Box::new(IslandSolver::new()))
    }

    /// Create a space around a custom broad phase and island manager
    pub fn with_collaborators(
        config: PhysicsSpaceConfig,
        broad_phase: Box<dyn BroadPhase>,
        islands: Box<dyn IslandManager>,
    ) -> Self {
        let config = config.sanitized();
        let collision_table = CollisionTable::default().with_max_groups(config.max_collision_groups);
        let mut events = PhysicsEventManager::new();
        events.set_group_filters(&collision_table);
        info!(
            "Creating physics space ({} sub-steps, contact pool of {})",
            config.sub_step_count, config.contact_pool_capacity
        );

        Self {
            flags: SpaceFlags::empty(),
            debug_flags: SolverDebugFlags::empty(),
            collision_table,
            nodes: HandleMap::with_key(),
            colliders: HandleMap::with_key(),
            bodies: HandleMap::with_key(),
            joints: HandleMap::with_key(),
            queue: NodeQueue::new(),
            owner_ids: IdAllocator::new(),
            collider_ids: IdAllocator::new(),
            retired_proxies: Vec::new(),
            broad_phase,
            narrow_phase: CollisionManager::new(),
            contacts: ContactManager::new(config.contact_pool_capacity),
            islands,
            events,
            filtered_pairs: HashSet::new(),
            gravity: GravityEffect::new(config.gravity),
            effects: Vec::new(),
            hierarchy_effects: HashMap::new(),
            vehicles: Vec::new(),
            moved_kinematics: HashSet::new(),
            statistics: StepStatistics::default(),
            config,
        }
    }

    // ---------------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------------

    /// Active configuration
    pub const fn config(&self) -> &PhysicsSpaceConfig {
        &self.config
    }

    /// State bits
    pub const fn flags(&self) -> SpaceFlags {
        self.flags
    }

    /// Collision table the space filters with
    pub const fn collision_table(&self) -> &CollisionTable {
        &self.collision_table
    }

    /// A node
    pub fn node(&self, handle: NodeHandle) -> Option<&PhysicsNode> {
        self.nodes.get(handle)
    }

    /// A collider
    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    /// A rigid body
    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    /// A joint
    pub fn joint(&self, handle: JointHandle) -> Option<&Joint> {
        self.joints.get(handle)
    }

    /// A contact. Removed contacts stay readable until the end of the step
    /// that removed them.
    pub fn contact(&self, handle: ContactHandle) -> Option<&Contact> {
        self.contacts.get(handle)
    }

    /// The contact manager
    pub const fn contacts(&self) -> &ContactManager {
        &self.contacts
    }

    /// Every node
    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &PhysicsNode)> {
        self.nodes.iter()
    }

    /// Every collider
    pub fn colliders(&self) -> impl Iterator<Item = (ColliderHandle, &Collider)> {
        self.colliders.iter()
    }

    /// Every rigid body
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies.iter()
    }

    /// Colliders without a moving body, in handle order
    pub fn static_colliders(&self) -> Vec<ColliderHandle> {
        let view = self.collision_view();
        self.colliders.iter().filter(|(_, c)| view.is_static(c)).map(|(h, _)| h).collect()
    }

    /// Colliders carried by a dynamic or kinematic body, in handle order
    pub fn dynamic_colliders(&self) -> Vec<ColliderHandle> {
        let view = self.collision_view();
        self.colliders.iter().filter(|(_, c)| !view.is_static(c)).map(|(h, _)| h).collect()
    }

    /// The broad phase
    pub fn broad_phase(&self) -> &dyn BroadPhase {
        self.broad_phase.as_ref()
    }

    /// The narrow phase dispatch table, for registering custom tests
    pub fn narrow_phase_mut(&mut self) -> &mut CollisionManager {
        &mut self.narrow_phase
    }

    /// Islands built by the last step
    pub fn islands(&self) -> &[Island] {
        self.islands.islands()
    }

    /// Counters of the last sub-step
    pub const fn statistics(&self) -> &StepStatistics {
        &self.statistics
    }

    /// Events waiting for the next dispatch point
    pub fn pending_events(&self) -> &[PhysicsEvent] {
        self.events.batched()
    }

    /// Number of nodes waiting for a flush
    pub fn queued_node_count(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn collision_view(&self) -> CollisionView<'_> {
        CollisionView {
            colliders: &self.colliders,
            bodies: &self.bodies,
            nodes: &self.nodes,
            filtered_pairs: &self.filtered_pairs,
        }
    }

    // ---------------------------------------------------------------------
    // Options
    // ---------------------------------------------------------------------

    /// Set how many fixed sub-steps a frame is split into. Values above
    /// the maximum are clamped; zero skips every frame until raised.
    pub fn set_sub_step_count(&mut self, count: u32) {
        if count > MAX_SUB_STEPS {
            warn!(
                "The sub-step count of physics must be between {MIN_SUB_STEPS} and {MAX_SUB_STEPS}. \
                 The value {count} has been clamped."
            );
            self.config.sub_step_count = MAX_SUB_STEPS;
        } else {
            if count < MIN_SUB_STEPS {
                warn!(
                    "The sub-step count of physics must be between {MIN_SUB_STEPS} and {MAX_SUB_STEPS}. \
                     Frames are skipped while it is 0."
                );
            }
            self.config.sub_step_count = count;
        }
    }

    /// Allow or forbid sleeping. Every dynamic body is woken either way.
    pub fn set_allow_sleep(&mut self, allow_sleep: bool) {
        self.config.allow_sleep = allow_sleep;
        self.force_awake_rigid_bodies();
    }

    /// Change the space's 2D mode; bodies that inherit it follow
    pub fn set_mode_2d(&mut self, mode_2d: bool) {
        self.config.mode_2d = mode_2d;
        for body in self.bodies.values_mut() {
            body.update_mode_2d(mode_2d);
        }
    }

    /// Sort candidate pairs so results do not depend on insertion order
    pub fn set_deterministic(&mut self, deterministic: bool) {
        self.config.deterministic = deterministic;
    }

    /// Filter with `table` from now on, re-resolving every collider's
    /// group instance. The table takes this space's group cap.
    pub fn set_collision_table(&mut self, table: CollisionTable) {
        debug!("space switched to collision table '{}'", table.name());
        self.collision_table = table.with_max_groups(self.config.max_collision_groups);
        self.refresh_group_instances();
    }

    /// Re-read every collider's group instance from the current table
    pub fn refresh_group_instances(&mut self) {
        self.events.set_group_filters(&self.collision_table);
        for collider in self.colliders.values_mut() {
            let instance = Self::resolve_instance(&self.collision_table, collider.group());
            let group = collider.group().clone();
            collider.set_group(group, instance);
        }
    }

    /// Replace the solver configuration, clamping invalid values
    pub fn set_solver_config(&mut self, solver: SolverConfig) {
        if let Err(err) = solver.validate() {
            warn!("{err}; the solver configuration has been clamped");
        }
        let mut config = self.config.clone();
        config.solver = solver;
        self.config = config.sanitized();
    }

    /// Change the built-in gravity
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.config.gravity = gravity;
        self.gravity.acceleration = gravity;
    }

    /// Turn editor preview on or off
    pub fn set_preview(&mut self, preview: bool) {
        self.flags.set(SpaceFlags::PREVIEW, preview);
    }

    /// Whether the space only publishes transforms
    pub const fn is_preview(&self) -> bool {
        self.flags.contains(SpaceFlags::PREVIEW)
    }

    /// Switch parts of the solver off for debugging
    pub fn set_debug_flags(&mut self, flags: SolverDebugFlags) {
        self.debug_flags = flags;
    }

    /// Wake every dynamic body
    pub fn force_awake_rigid_bodies(&mut self) {
        for (handle, body) in &mut self.bodies {
            if body.is_dynamic() && body.force_awake_internal() {
                self.events.send(PhysicsEvent::BodyAwoke(handle));
            }
        }
    }

    fn resolve_instance(table: &CollisionTable, group: &CollisionGroup) -> CollisionGroupInstance {
        table.try_group_instance(group.id()).unwrap_or_else(|| {
            warn!(
                "Collision group '{group}' is not registered in table '{}'; using the default group",
                table.name()
            );
            table.group_instance(group.id())
        })
    }

    fn group_instance_for(&mut self, group: &CollisionGroup) -> CollisionGroupInstance {
        if self.collision_table.try_group_instance(group.id()).is_none() && self.collision_table.auto_register() {
            match self.collision_table.register_group(group) {
                Ok(()) => self.refresh_group_instances(),
                Err(err) => warn!("Could not register collision group '{group}': {err}"),
            }
        }
        Self::resolve_instance(&self.collision_table, group)
    }

    // ---------------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------------

    fn live_node(&self, handle: NodeHandle) -> PhysicsResult<&PhysicsNode> {
        let node = self.nodes.get(handle).ok_or(PhysicsError::InvalidHandle("node"))?;
        if node.is_destroyed() {
            let message = format!("node of owner {} used after destruction", node.owner_id());
            error!("Object mutated after destruction: {message}");
            debug_assert!(false, "Object mutated after destruction: {message}");
            return Err(PhysicsError::DestroyedOwner(message));
        }
        Ok(node)
    }

    pub(crate) fn queue_action(&mut self, node: NodeHandle, action: PendingAction) -> PhysicsResult<()> {
        self.queue.push(&mut self.nodes, node, action)
    }

    /// Create a node under `parent` (or as a root)
    pub fn create_node(&mut self, parent: Option<NodeHandle>, local: Transform) -> PhysicsResult<NodeHandle> {
        let depth = match parent {
            Some(parent) => self.live_node(parent)?.depth() + 1,
            None => 0,
        };
        let owner_id = self.owner_ids.next_id();
        let handle = self.nodes.insert(PhysicsNode::new(owner_id, parent, local, depth));
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.push(handle);
        }
        self.queue_action(handle, PendingAction::Transform(TransformSource::External))?;
        Ok(handle)
    }

    /// Move a node relative to its parent
    pub fn set_local_transform(&mut self, node: NodeHandle, local: Transform) -> PhysicsResult<()> {
        self.queue_action(node, PendingAction::Transform(TransformSource::External))?;
        if let Some(data) = self.nodes.get_mut(node) {
            data.local = local;
        }
        Ok(())
    }

    /// World transform of a node, flushing first
    pub fn world_transform(&mut self, node: NodeHandle) -> Option<Transform> {
        self.flush();
        self.nodes.get(node).filter(|n| !n.is_destroyed()).map(|n| *n.world_transform())
    }

    /// Tear down a node and everything below it.
    ///
    /// Colliders and bodies are unlinked at once, their contacts end with
    /// immediately dispatched events, and pair filters naming any of the
    /// owners are erased. Memory is reclaimed at the next flush.
    pub fn destroy_node(&mut self, node: NodeHandle) -> PhysicsResult<()> {
        let parent = self.live_node(node)?.parent();
        let mut subtree = Vec::new();
        super::node::collect_subtree(&self.nodes, node, &mut subtree);

        for &handle in subtree.iter().rev() {
            let Some(data) = self.nodes.get(handle) else {
                continue;
            };
            if data.is_destroyed() {
                continue;
            }
            let (collider, body, owner) = (data.collider(), data.body(), data.owner_id());
            if let Some(collider) = collider {
                self.remove_collider(collider)?;
            }
            if let Some(body) = body {
                self.remove_rigid_body(body)?;
            }
            self.erase_pair_filters(owner);
            self.hierarchy_effects.remove(&handle);
            self.queue_action(handle, PendingAction::BroadPhase(BroadPhaseAction::Remove))?;
            if let Some(data) = self.nodes.get_mut(handle) {
                data.mark_destroyed();
            }
        }

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|child| *child != node);
        }
        debug!("destroyed node subtree of {} nodes", subtree.len());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Colliders
    // ---------------------------------------------------------------------

    /// Attach a collider to `node`, replacing any collider already there
    pub fn add_collider(&mut self, node: NodeHandle, desc: ColliderDesc) -> PhysicsResult<ColliderHandle> {
        let (existing, owner, world) = {
            let data = self.live_node(node)?;
            (data.collider(), data.owner_id(), *data.world_transform())
        };
        if let Some(existing) = existing {
            warn!("Node of owner {owner} already has a collider; replacing it");
            self.remove_collider(existing)?;
        }

        let instance = self.group_instance_for(&desc.group);
        let mut collider = Collider::new(self.collider_ids.next_id(), node, desc, instance);
        collider.update_world(&world);
        let filtered = self.filtered_pairs.iter().any(|&key| {
            let (low, high) = unpack_lexicographic_id(key);
            low == owner || high == owner
        });
        collider.set_flag(ColliderFlags::HAS_PAIR_FILTER, filtered);

        let handle = self.colliders.insert(collider);
        if let Some(data) = self.nodes.get_mut(node) {
            data.collider = Some(handle);
        }
        self.relink_subtree(node)?;
        self.queue_action(node, PendingAction::Transform(TransformSource::External))?;
        self.queue_action(node, PendingAction::BroadPhase(BroadPhaseAction::Insert))?;
        self.queue_action(node, PendingAction::Mass)?;
        Ok(handle)
    }

    /// Remove a collider: its contacts end, its joints become invalid and
    /// pair filters naming its owner are erased
    pub fn remove_collider(&mut self, handle: ColliderHandle) -> PhysicsResult<()> {
        let collider = self.colliders.get(handle).ok_or(PhysicsError::InvalidHandle("collider"))?;
        let node = collider.node();
        let body = collider.active_body();
        let contacts: Vec<ContactHandle> = collider.contact_edges().iter().map(|edge| edge.contact).collect();
        let joints: Vec<JointEdge> = collider.joint_edges().to_vec();

        for contact in contacts {
            let wake = self.contacts.remove(&mut self.colliders, contact, &mut self.events, true);
            self.wake_bodies(wake);
        }
        for edge in joints {
            if let Some(joint) = self.joints.get_mut(edge.joint) {
                joint.invalidate();
            }
            if let Some(other) = self.colliders.get_mut(edge.other) {
                remove_joint_edge(&mut other.joint_edges, edge.joint);
            }
        }

        self.colliders.remove(handle);
        self.retired_proxies.push(handle);
        let owner = self.nodes.get(node).map(PhysicsNode::owner_id);
        if let Some(data) = self.nodes.get_mut(node) {
            data.collider = None;
        }
        if let Some(owner) = owner {
            self.erase_pair_filters(owner);
        }

        self.rebuild_body_lists();
        if let Some(body_node) = body.and_then(|b| self.bodies.get(b)).map(RigidBody::node) {
            if self.nodes.get(body_node).is_some_and(|n| !n.is_destroyed()) {
                self.queue_action(body_node, PendingAction::Mass)?;
            }
        }
        if self.nodes.get(node).is_some_and(|n| !n.is_destroyed()) {
            self.queue_action(node, PendingAction::BroadPhase(BroadPhaseAction::Remove))?;
        }
        self.dispatch_immediate();
        Ok(())
    }

    fn live_collider_node(&self, handle: ColliderHandle) -> PhysicsResult<NodeHandle> {
        let node = self.colliders.get(handle).ok_or(PhysicsError::InvalidHandle("collider"))?.node();
        self.live_node(node)?;
        Ok(node)
    }

    /// Swap a collider's shape
    pub fn set_shape(&mut self, handle: ColliderHandle, shape: Shape) -> PhysicsResult<()> {
        let node = self.live_collider_node(handle)?;
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_shape(shape);
        }
        self.queue_action(node, PendingAction::Transform(TransformSource::External))?;
        self.queue_action(node, PendingAction::BroadPhase(BroadPhaseAction::Update))?;
        self.queue_action(node, PendingAction::Mass)
    }

    /// Swap a collider's material
    pub fn set_material(&mut self, handle: ColliderHandle, material: PhysicsMaterial) -> PhysicsResult<()> {
        let node = self.live_collider_node(handle)?;
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_material(material);
        }
        self.queue_action(node, PendingAction::Mass)
    }

    /// Push new values of a shared material to every collider using it
    pub fn refresh_material(&mut self, material: &PhysicsMaterial) -> usize {
        let id = material.id();
        let users: Vec<ColliderHandle> = self
            .colliders
            .iter()
            .filter(|(_, c)| c.material().id() == id)
            .map(|(h, _)| h)
            .collect();
        for &handle in &users {
            if let Err(err) = self.set_material(handle, material.clone()) {
                warn!("Could not refresh material '{}': {err}", material.name);
            }
        }
        users.len()
    }

    /// Move a collider to another collision group
    pub fn set_collision_group(&mut self, handle: ColliderHandle, group: CollisionGroup) -> PhysicsResult<()> {
        self.live_collider_node(handle)?;
        let instance = self.group_instance_for(&group);
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_group(group, instance);
        }
        Ok(())
    }

    /// Make a collider a ghost or a solid
    pub fn set_ghost(&mut self, handle: ColliderHandle, ghost: bool) -> PhysicsResult<()> {
        self.live_collider_node(handle)?;
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_flag(ColliderFlags::GHOST, ghost);
        }
        Ok(())
    }

    /// World bounds of a collider, flushing first
    pub fn world_aabb(&mut self, handle: ColliderHandle) -> Option<Aabb> {
        self.flush();
        self.colliders.get(handle).map(|c| *c.world_aabb())
    }

    /// World volume of a collider, flushing first
    pub fn compute_volume(&mut self, handle: ColliderHandle) -> Option<f32> {
        self.flush();
        self.colliders.get(handle).map(Collider::compute_volume)
    }

    // ---------------------------------------------------------------------
    // Rigid bodies
    // ---------------------------------------------------------------------

    /// Attach a body to `node`. Colliders at or below the node without a
    /// nearer body become part of it.
    pub fn add_rigid_body(&mut self, node: NodeHandle, desc: &RigidBodyDesc) -> PhysicsResult<BodyHandle> {
        let (existing, world) = {
            let data = self.live_node(node)?;
            (data.body(), *data.world_transform())
        };
        if let Some(existing) = existing {
            warn!("Node already has a rigid body; keeping the existing one");
            return Ok(existing);
        }

        let mut body = RigidBody::new(node, desc, &world, self.config.mode_2d);
        body.record_old_transform(&world);
        let handle = self.bodies.insert(body);
        if let Some(data) = self.nodes.get_mut(node) {
            data.body = Some(handle);
        }
        self.relink_subtree(node)?;
        self.queue_action(node, PendingAction::Transform(TransformSource::External))?;
        self.queue_action(node, PendingAction::Mass)?;
        Ok(handle)
    }

    /// Detach a body. Its colliders fall back to the next body up, or
    /// become static.
    pub fn remove_rigid_body(&mut self, handle: BodyHandle) -> PhysicsResult<()> {
        let body = self.bodies.remove(handle).ok_or(PhysicsError::InvalidHandle("body"))?;
        let node = body.node();
        if let Some(data) = self.nodes.get_mut(node) {
            data.body = None;
        }
        self.vehicles.retain(|(chassis, _)| *chassis != handle);
        self.moved_kinematics.remove(&handle);
        if self.nodes.get(node).is_some_and(|n| !n.is_destroyed()) {
            self.relink_subtree(node)?;
        } else {
            self.rebuild_body_lists();
        }
        Ok(())
    }

    fn body_mut(&mut self, handle: BodyHandle) -> PhysicsResult<&mut RigidBody> {
        self.bodies.get_mut(handle).ok_or(PhysicsError::InvalidHandle("body"))
    }

    /// Set the linear velocity, waking the body
    pub fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.set_velocity(velocity);
        self.wake_up(handle)
    }

    /// Set the angular velocity, waking the body
    pub fn set_angular_velocity(&mut self, handle: BodyHandle, angular_velocity: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.set_angular_velocity(angular_velocity);
        self.wake_up(handle)
    }

    /// Accumulate a force through the center of mass
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.apply_force(&force);
        self.wake_up(handle)
    }

    /// Accumulate a torque
    pub fn apply_torque(&mut self, handle: BodyHandle, torque: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.apply_torque(&torque);
        self.wake_up(handle)
    }

    /// Accumulate a force acting at a world point
    pub fn apply_force_at_point(&mut self, handle: BodyHandle, force: Vec3, world_point: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.apply_force_at_point(&force, &world_point);
        self.wake_up(handle)
    }

    /// Change the velocity by an impulse through the center of mass
    pub fn apply_linear_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.apply_linear_impulse(&impulse);
        self.wake_up(handle)
    }

    /// Change the angular velocity by an angular impulse
    pub fn apply_angular_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.apply_angular_impulse(&impulse);
        self.wake_up(handle)
    }

    /// Apply an impulse at a world point
    pub fn apply_impulse_at_point(&mut self, handle: BodyHandle, impulse: Vec3, world_point: Vec3) -> PhysicsResult<()> {
        self.body_mut(handle)?.apply_impulse_at_point(&impulse, &world_point);
        self.wake_up(handle)
    }

    /// Switch between dynamic, static and kinematic
    pub fn set_dynamic_state(&mut self, handle: BodyHandle, state: DynamicState) -> PhysicsResult<()> {
        let (changed, node) = {
            let body = self.body_mut(handle)?;
            (body.set_dynamic_state(state), body.node())
        };
        if !changed {
            return Ok(());
        }
        let world = self.nodes.get(node).map(|n| *n.world_transform()).unwrap_or_default();
        if let Some(body) = self.bodies.get_mut(handle) {
            body.record_old_transform(&world);
        }
        let collider_nodes: Vec<NodeHandle> = self
            .bodies
            .get(handle)
            .map(|b| b.colliders().iter().filter_map(|c| self.colliders.get(*c)).map(Collider::node).collect())
            .unwrap_or_default();
        for collider_node in collider_nodes {
            self.queue_action(collider_node, PendingAction::BroadPhase(BroadPhaseAction::Update))?;
        }
        self.queue_action(node, PendingAction::Mass)?;
        self.force_awake(handle)
    }

    /// Allow or forbid one body to sleep
    pub fn set_body_allow_sleep(&mut self, handle: BodyHandle, allow_sleep: bool) -> PhysicsResult<()> {
        self.body_mut(handle)?.set_allow_sleep(allow_sleep);
        if allow_sleep {
            Ok(())
        } else {
            self.force_awake(handle)
        }
    }

    /// Lock or unlock rotation
    pub fn set_rotation_locked(&mut self, handle: BodyHandle, locked: bool) -> PhysicsResult<()> {
        self.body_mut(handle)?.set_rotation_locked(locked);
        Ok(())
    }

    /// Set one body's 2D behaviour
    pub fn set_body_mode_2d(&mut self, handle: BodyHandle, mode: Mode2D) -> PhysicsResult<()> {
        let space_mode_2d = self.config.mode_2d;
        self.body_mut(handle)?.set_mode_2d(mode, space_mode_2d);
        Ok(())
    }

    /// Wake a sleeping body without touching its sleep timer
    pub fn wake_up(&mut self, handle: BodyHandle) -> PhysicsResult<()> {
        if self.body_mut(handle)?.internal_wake_up() {
            self.events.send(PhysicsEvent::BodyAwoke(handle));
        }
        Ok(())
    }

    /// Wake a body and every non-dynamic body below it, resetting timers
    pub fn force_awake(&mut self, handle: BodyHandle) -> PhysicsResult<()> {
        self.body_mut(handle)?;
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let Some(body) = self.bodies.get_mut(current) else {
                continue;
            };
            if body.force_awake_internal() {
                self.events.send(PhysicsEvent::BodyAwoke(current));
            }
            let children = body.child_bodies().to_vec();
            stack.extend(
                children
                    .into_iter()
                    .filter(|child| self.bodies.get(*child).is_some_and(|b| !b.is_dynamic())),
            );
        }
        Ok(())
    }

    /// Put a body and every non-dynamic body below it to sleep
    pub fn force_asleep(&mut self, handle: BodyHandle) -> PhysicsResult<()> {
        self.body_mut(handle)?;
        let time_to_sleep = self.config.solver.time_to_sleep;
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let Some(body) = self.bodies.get_mut(current) else {
                continue;
            };
            let was_asleep = body.is_asleep();
            body.force_asleep_internal(time_to_sleep);
            if !was_asleep {
                self.events.send(PhysicsEvent::BodySlept(current));
            }
            let children = body.child_bodies().to_vec();
            stack.extend(
                children
                    .into_iter()
                    .filter(|child| self.bodies.get(*child).is_some_and(|b| !b.is_dynamic())),
            );
        }
        Ok(())
    }

    pub(crate) fn wake_bodies(&mut self, bodies: [Option<BodyHandle>; 2]) {
        for handle in bodies.into_iter().flatten() {
            let Some(body) = self.bodies.get_mut(handle) else {
                continue;
            };
            if body.is_dynamic() && body.force_awake_internal() {
                self.events.send(PhysicsEvent::BodyAwoke(handle));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Joints
    // ---------------------------------------------------------------------

    /// Connect two colliders
    pub fn add_joint(&mut self, a: ColliderHandle, b: ColliderHandle, collide_connected: bool) -> PhysicsResult<JointHandle> {
        if !self.colliders.contains_key(a) || !self.colliders.contains_key(b) {
            return Err(PhysicsError::InvalidHandle("collider"));
        }
        let handle = self.joints.insert(Joint::new(a, b, collide_connected));
        if let Some(collider) = self.colliders.get_mut(a) {
            insert_joint_edge(&mut collider.joint_edges, JointEdge { joint: handle, other: b, collide_connected });
        }
        if let Some(collider) = self.colliders.get_mut(b) {
            insert_joint_edge(&mut collider.joint_edges, JointEdge { joint: handle, other: a, collide_connected });
        }
        Ok(handle)
    }

    /// Delete a joint
    pub fn remove_joint(&mut self, handle: JointHandle) -> PhysicsResult<()> {
        let joint = self.joints.remove(handle).ok_or(PhysicsError::InvalidHandle("joint"))?;
        for collider in joint.colliders() {
            if let Some(collider) = self.colliders.get_mut(collider) {
                remove_joint_edge(&mut collider.joint_edges, handle);
            }
        }
        Ok(())
    }

    /// Change whether jointed colliders still collide
    pub fn set_joint_collide_connected(&mut self, handle: JointHandle, collide_connected: bool) -> PhysicsResult<()> {
        let joint = self.joints.get_mut(handle).ok_or(PhysicsError::InvalidHandle("joint"))?;
        joint.set_collide_connected(collide_connected);
        let [a, b] = joint.colliders();
        for (this, other) in [(a, b), (b, a)] {
            if let Some(collider) = self.colliders.get_mut(this) {
                if remove_joint_edge(&mut collider.joint_edges, handle).is_some() {
                    insert_joint_edge(&mut collider.joint_edges, JointEdge { joint: handle, other, collide_connected });
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Effects and vehicles
    // ---------------------------------------------------------------------

    /// Add an effect acting on every awake dynamic body
    pub fn add_effect(&mut self, effect: Box<dyn PhysicsEffect>) {
        self.effects.push(effect);
    }

    /// Add an effect acting on bodies at or below `node`
    pub fn add_hierarchy_effect(&mut self, node: NodeHandle, effect: Box<dyn PhysicsEffect>) -> PhysicsResult<()> {
        self.live_node(node)?;
        self.hierarchy_effects.entry(node).or_default().push(effect);
        Ok(())
    }

    /// Drop every global and hierarchy effect. Gravity stays.
    pub fn clear_effects(&mut self) {
        self.effects.clear();
        self.hierarchy_effects.clear();
    }

    /// Drive `hook` from the body `chassis`
    pub fn add_vehicle(&mut self, chassis: BodyHandle, hook: Box<dyn VehicleHook>) -> PhysicsResult<()> {
        self.body_mut(chassis)?;
        self.vehicles.push((chassis, hook));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Register a handler for one event type
    pub fn register_handler(&mut self, event_type: PhysicsEventType, handler: Box<dyn PhysicsEventHandler>) {
        self.events.register_handler(event_type, handler);
    }

    /// Register a handler for every event
    pub fn register_global_handler(&mut self, handler: Box<dyn PhysicsEventHandler>) {
        self.events.register_global_handler(handler);
    }

    /// Deliver `events` to the registered handlers. Events sent
    /// immediately while handlers run are delivered in the same pass.
    pub(crate) fn dispatch(&mut self, mut events: Vec<PhysicsEvent>) {
        if self.flags.contains(SpaceFlags::DISPATCHING) {
            for event in events {
                self.events.send_immediately(event);
            }
            return;
        }
        self.flags.insert(SpaceFlags::DISPATCHING);
        let mut handlers = self.events.take_handlers();
        loop {
            events.extend(self.events.take_immediate());
            if events.is_empty() {
                break;
            }
            for event in std::mem::take(&mut events) {
                handlers.deliver(self, &event);
            }
        }
        self.events.restore_handlers(handlers);
        self.flags.remove(SpaceFlags::DISPATCHING);
    }

    /// Deliver events that were sent immediately
    pub(crate) fn dispatch_immediate(&mut self) {
        if !self.flags.contains(SpaceFlags::DISPATCHING) {
            self.dispatch(Vec::new());
        }
    }
}
