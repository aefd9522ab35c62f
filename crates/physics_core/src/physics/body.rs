//! # Rigid Bodies
//!
//! Mass, velocity and sleep state of a simulated object. A body sits on a
//! [`PhysicsNode`](super::PhysicsNode); every collider on that node or on a
//! descendant node without its own body contributes to the body's mass.
//!
//! Bodies only know about themselves. Anything touching other bodies
//! (waking children, list membership, events) is done by the owning space.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::foundation::collections::{BodyHandle, ColliderHandle, NodeHandle};
use crate::foundation::math::utils::{attempt_normalize, quat_from_axis_angle};
use crate::foundation::math::{Mat3, Quat, Transform, Vec3};

/// How a body takes part in the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DynamicState {
    /// Moved by forces and contacts
    #[default]
    Dynamic,
    /// Never moves
    Static,
    /// Moved only by its transform; pushes dynamic bodies with infinite mass
    Kinematic,
}

/// Per-body 2D setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode2D {
    /// Follow the space
    #[default]
    InheritFromSpace,
    /// Always 2D
    Enabled,
    /// Always 3D
    Disabled,
}

/// Bookkeeping for kinematic bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KinematicState {
    /// Received a transform write this frame
    Moving,
    /// Moved last frame; its velocity is cleared next frame
    Stopped,
    /// Not moving
    #[default]
    Inactive,
}

bitflags! {
    /// Body state bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RigidBodyFlags: u32 {
        /// Not integrated until woken
        const ASLEEP = 1 << 0;
        /// May fall asleep
        const ALLOW_SLEEP = 1 << 1;
        /// Angular motion disabled
        const ROTATION_LOCKED = 1 << 2;
        /// Constrained to the XY plane
        const MODE_2D = 1 << 3;
        /// Takes its 2D mode from the space
        const INHERIT_2D_MODE = 1 << 4;
        /// Sleep timer already advanced this step
        const SLEEP_ACCUMULATED = 1 << 5;
    }
}

/// Parameters for creating a body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyDesc {
    /// Dynamic, static or kinematic
    pub dynamic_state: DynamicState,
    /// Initial linear velocity
    pub velocity: Vec3,
    /// Initial angular velocity
    pub angular_velocity: Vec3,
    /// Whether the body may sleep
    pub allow_sleep: bool,
    /// Start asleep
    pub asleep: bool,
    /// Disable rotation
    pub rotation_locked: bool,
    /// 2D behaviour
    pub mode_2d: Mode2D,
}

impl Default for RigidBodyDesc {
    fn default() -> Self {
        Self {
            dynamic_state: DynamicState::Dynamic,
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            allow_sleep: true,
            asleep: false,
            rotation_locked: false,
            mode_2d: Mode2D::InheritFromSpace,
        }
    }
}

impl RigidBodyDesc {
    /// Dynamic body description
    pub fn dynamic() -> Self {
        Self::default()
    }

    /// Static body description
    pub fn fixed() -> Self {
        Self { dynamic_state: DynamicState::Static, ..Self::default() }
    }

    /// Kinematic body description
    pub fn kinematic() -> Self {
        Self { dynamic_state: DynamicState::Kinematic, ..Self::default() }
    }

    /// Set the initial velocity
    #[must_use]
    pub const fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set the initial angular velocity
    #[must_use]
    pub const fn with_angular_velocity(mut self, angular_velocity: Vec3) -> Self {
        self.angular_velocity = angular_velocity;
        self
    }

    /// Allow or forbid sleeping
    #[must_use]
    pub const fn with_allow_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    /// Start asleep
    #[must_use]
    pub const fn asleep(mut self) -> Self {
        self.asleep = true;
        self
    }

    /// Lock rotation
    #[must_use]
    pub const fn with_rotation_locked(mut self, locked: bool) -> Self {
        self.rotation_locked = locked;
        self
    }

    /// Set the 2D mode
    #[must_use]
    pub const fn with_mode_2d(mut self, mode: Mode2D) -> Self {
        self.mode_2d = mode;
        self
    }
}

/// Mass, center and inertia produced by [`MassAccumulator`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    /// Total mass
    pub mass: f32,
    /// World center of mass
    pub center: Vec3,
    /// World inertia tensor about `center`
    pub inertia: Mat3,
}

/// Sums collider contributions with the parallel axis theorem
#[derive(Debug, Clone, Default)]
pub struct MassAccumulator {
    parts: Vec<(f32, Vec3, Mat3)>,
}

impl MassAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a part of `mass` centered at `center` with world inertia
    /// `inertia` about its own center
    pub fn add(&mut self, mass: f32, center: Vec3, inertia: Mat3) {
        if mass > 0.0 {
            self.parts.push((mass, center, inertia));
        }
    }

    /// Combined properties, or `None` when nothing had mass
    pub fn finish(&self) -> Option<MassProperties> {
        let mass: f32 = self.parts.iter().map(|(m, _, _)| m).sum();
        if mass <= 0.0 {
            return None;
        }
        let center = self.parts.iter().map(|(m, c, _)| c * *m).sum::<Vec3>() / mass;
        let mut inertia = Mat3::zeros();
        for (m, c, part) in &self.parts {
            let d = c - center;
            inertia += part + (Mat3::identity() * d.norm_squared() - d * d.transpose()) * *m;
        }
        Some(MassProperties { mass, center, inertia })
    }
}

/// Solve `a * x = b` with a few Gauss-Seidel sweeps. Returns zero when the
/// sweeps do not converge, which is the fallback for singular inertia.
pub fn solve_singular(a: &Mat3, b: &Vec3) -> Vec3 {
    const ITERATIONS: usize = 8;
    const TOLERANCE: f32 = 1.0e-4;

    let mut x = Vec3::zeros();
    for _ in 0..ITERATIONS {
        for i in 0..3 {
            let diagonal = a[(i, i)];
            if diagonal.abs() < f32::EPSILON {
                x[i] = 0.0;
                continue;
            }
            let off_diagonal: f32 = (0..3).filter(|&j| j != i).map(|j| a[(i, j)] * x[j]).sum();
            x[i] = (b[i] - off_diagonal) / diagonal;
        }
        if (a * x - b).norm() <= TOLERANCE * b.norm().max(1.0) {
            return x;
        }
    }
    Vec3::zeros()
}

/// Angular velocity that carries `old` to `new` over `dt`
pub fn angular_velocity_approximation(old: &Quat, new: &Quat, dt: f32) -> Vec3 {
    if dt <= 0.0 {
        return Vec3::zeros();
    }
    let delta = new * old.inverse();
    delta.scaled_axis() / dt
}

/// A rigid body
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub(crate) node: NodeHandle,
    pub(crate) parent_body: Option<BodyHandle>,
    pub(crate) child_bodies: Vec<BodyHandle>,
    pub(crate) colliders: Vec<ColliderHandle>,
    pub(crate) kinematic_state: KinematicState,
    dynamic_state: DynamicState,
    flags: RigidBodyFlags,

    velocity: Vec3,
    angular_velocity: Vec3,
    force: Vec3,
    torque: Vec3,

    mass: f32,
    inv_mass: f32,
    local_inertia: Mat3,
    local_inv_inertia: Mat3,
    world_inv_inertia: Mat3,
    inertia_singular: bool,

    center_of_mass: Vec3,
    rotation: Quat,
    local_center_offset: Vec3,
    sleep_timer: f32,

    old_position: Vec3,
    old_rotation: Quat,
}

impl RigidBody {
    pub(crate) fn new(node: NodeHandle, desc: &RigidBodyDesc, world: &Transform, space_mode_2d: bool) -> Self {
        let mut flags = RigidBodyFlags::empty();
        flags.set(RigidBodyFlags::ALLOW_SLEEP, desc.allow_sleep);
        flags.set(RigidBodyFlags::ASLEEP, desc.asleep);
        flags.set(RigidBodyFlags::ROTATION_LOCKED, desc.rotation_locked);
        flags.set(RigidBodyFlags::INHERIT_2D_MODE, desc.mode_2d == Mode2D::InheritFromSpace);
        let mode_2d = match desc.mode_2d {
            Mode2D::InheritFromSpace => space_mode_2d,
            Mode2D::Enabled => true,
            Mode2D::Disabled => false,
        };
        flags.set(RigidBodyFlags::MODE_2D, mode_2d);

        let mut body = Self {
            node,
            parent_body: None,
            child_bodies: Vec::new(),
            colliders: Vec::new(),
            kinematic_state: KinematicState::Inactive,
            dynamic_state: desc.dynamic_state,
            flags,
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            force: Vec3::zeros(),
            torque: Vec3::zeros(),
            mass: 0.0,
            inv_mass: 0.0,
            local_inertia: Mat3::zeros(),
            local_inv_inertia: Mat3::zeros(),
            world_inv_inertia: Mat3::zeros(),
            inertia_singular: false,
            center_of_mass: world.position,
            rotation: world.rotation,
            local_center_offset: Vec3::zeros(),
            sleep_timer: 0.0,
            old_position: world.position,
            old_rotation: world.rotation,
        };
        if body.dynamic_state != DynamicState::Static {
            body.velocity = desc.velocity;
            body.angular_velocity = desc.angular_velocity;
            body.apply_locks();
        }
        body
    }

    /// Node the body sits on
    pub const fn node(&self) -> NodeHandle {
        self.node
    }

    /// Nearest body above this one in the hierarchy
    pub const fn parent_body(&self) -> Option<BodyHandle> {
        self.parent_body
    }

    /// Bodies directly below this one in the hierarchy
    pub fn child_bodies(&self) -> &[BodyHandle] {
        &self.child_bodies
    }

    /// Colliders whose mass this body owns
    pub fn colliders(&self) -> &[ColliderHandle] {
        &self.colliders
    }

    /// Dynamic, static or kinematic
    pub const fn dynamic_state(&self) -> DynamicState {
        self.dynamic_state
    }

    /// Moved by forces and contacts
    pub fn is_dynamic(&self) -> bool {
        self.dynamic_state == DynamicState::Dynamic
    }

    /// Never moves
    pub fn is_static(&self) -> bool {
        self.dynamic_state == DynamicState::Static
    }

    /// Moved only by its transform
    pub fn is_kinematic(&self) -> bool {
        self.dynamic_state == DynamicState::Kinematic
    }

    /// Currently asleep
    pub const fn is_asleep(&self) -> bool {
        self.flags.contains(RigidBodyFlags::ASLEEP)
    }

    /// Allowed to fall asleep
    pub const fn allow_sleep(&self) -> bool {
        self.flags.contains(RigidBodyFlags::ALLOW_SLEEP)
    }

    /// Rotation disabled
    pub const fn rotation_locked(&self) -> bool {
        self.flags.contains(RigidBodyFlags::ROTATION_LOCKED)
    }

    /// Constrained to the XY plane
    pub const fn is_2d(&self) -> bool {
        self.flags.contains(RigidBodyFlags::MODE_2D)
    }

    /// State bits
    pub const fn flags(&self) -> RigidBodyFlags {
        self.flags
    }

    /// Linear velocity
    pub const fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Angular velocity
    pub const fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    /// Accumulated force
    pub const fn force(&self) -> Vec3 {
        self.force
    }

    /// Accumulated torque
    pub const fn torque(&self) -> Vec3 {
        self.torque
    }

    /// Total mass (zero for static, kinematic and massless bodies)
    pub const fn mass(&self) -> f32 {
        self.mass
    }

    /// Inverse mass
    pub const fn inverse_mass(&self) -> f32 {
        self.inv_mass
    }

    /// Inverse mass per axis, with locked axes zeroed
    pub fn inverse_mass_vector(&self) -> Vec3 {
        let z = if self.is_2d() { 0.0 } else { self.inv_mass };
        Vec3::new(self.inv_mass, self.inv_mass, z)
    }

    /// Inverse inertia in the body frame
    pub const fn local_inverse_inertia(&self) -> Mat3 {
        self.local_inv_inertia
    }

    /// Inverse inertia in world space
    pub const fn world_inverse_inertia(&self) -> Mat3 {
        self.world_inv_inertia
    }

    /// World center of mass
    pub const fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    /// World orientation
    pub const fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Seconds spent below the sleep thresholds
    pub const fn sleep_timer(&self) -> f32 {
        self.sleep_timer
    }

    /// Velocity of a world point attached to the body
    pub fn point_velocity(&self, world_point: &Vec3) -> Vec3 {
        self.velocity + self.angular_velocity.cross(&(world_point - self.center_of_mass))
    }

    pub(crate) fn set_velocity(&mut self, velocity: Vec3) {
        if self.is_static() {
            return;
        }
        self.velocity = velocity;
        self.apply_locks();
    }

    pub(crate) fn set_angular_velocity(&mut self, angular_velocity: Vec3) {
        if self.is_static() {
            return;
        }
        self.angular_velocity = angular_velocity;
        self.apply_locks();
    }

    pub(crate) fn apply_force(&mut self, force: &Vec3) {
        self.force += force;
    }

    pub(crate) fn apply_torque(&mut self, torque: &Vec3) {
        self.torque += torque;
    }

    pub(crate) fn apply_force_at_point(&mut self, force: &Vec3, world_point: &Vec3) {
        self.force += force;
        self.torque += (world_point - self.center_of_mass).cross(force);
    }

    /// Apply an impulse through the center of mass
    pub(crate) fn apply_linear_impulse(&mut self, impulse: &Vec3) {
        self.velocity += self.inverse_mass_vector().component_mul(impulse);
    }

    /// Apply an angular impulse
    pub(crate) fn apply_angular_impulse(&mut self, impulse: &Vec3) {
        self.angular_velocity += self.apply_inverse_inertia(impulse);
    }

    /// Apply an impulse at a world point
    pub(crate) fn apply_impulse_at_point(&mut self, impulse: &Vec3, world_point: &Vec3) {
        self.apply_linear_impulse(impulse);
        let r = world_point - self.center_of_mass;
        self.apply_angular_impulse(&r.cross(impulse));
    }

    pub(crate) fn set_dynamic_state(&mut self, state: DynamicState) -> bool {
        if state == self.dynamic_state {
            return false;
        }
        self.dynamic_state = state;
        if state != DynamicState::Dynamic {
            self.clear_mass_and_velocities();
        }
        true
    }

    pub(crate) fn set_allow_sleep(&mut self, allow: bool) {
        self.flags.set(RigidBodyFlags::ALLOW_SLEEP, allow);
    }

    pub(crate) fn set_rotation_locked(&mut self, locked: bool) {
        self.flags.set(RigidBodyFlags::ROTATION_LOCKED, locked);
        self.update_world_inertia();
        self.apply_locks();
    }

    /// Re-read the 2D mode from the space if the body inherits it
    pub(crate) fn update_mode_2d(&mut self, space_mode_2d: bool) {
        if self.flags.contains(RigidBodyFlags::INHERIT_2D_MODE) {
            self.set_2d_internal(space_mode_2d);
        }
    }

    pub(crate) fn set_mode_2d(&mut self, mode: Mode2D, space_mode_2d: bool) {
        self.flags.set(RigidBodyFlags::INHERIT_2D_MODE, mode == Mode2D::InheritFromSpace);
        match mode {
            Mode2D::InheritFromSpace => self.set_2d_internal(space_mode_2d),
            Mode2D::Enabled => self.set_2d_internal(true),
            Mode2D::Disabled => self.set_2d_internal(false),
        }
    }

    fn set_2d_internal(&mut self, enabled: bool) {
        self.flags.set(RigidBodyFlags::MODE_2D, enabled);
        self.update_world_inertia();
        self.apply_locks();
    }

    fn apply_locks(&mut self) {
        if self.is_2d() {
            self.velocity.z = 0.0;
            self.angular_velocity.x = 0.0;
            self.angular_velocity.y = 0.0;
        }
        if self.rotation_locked() {
            self.angular_velocity = Vec3::zeros();
        }
    }

    pub(crate) fn clear_mass_and_velocities(&mut self) {
        self.mass = 0.0;
        self.inv_mass = 0.0;
        self.local_inertia = Mat3::zeros();
        self.local_inv_inertia = Mat3::zeros();
        self.world_inv_inertia = Mat3::zeros();
        self.inertia_singular = false;
        self.velocity = Vec3::zeros();
        self.angular_velocity = Vec3::zeros();
    }

    /// Store freshly computed mass terms. `world` is the node's transform,
    /// used to remember where the center sits in the body frame.
    pub(crate) fn set_mass_properties(&mut self, properties: Option<MassProperties>, world: &Transform) {
        self.rotation = world.rotation;
        let Some(properties) = properties.filter(|_| self.is_dynamic()) else {
            self.mass = 0.0;
            self.inv_mass = 0.0;
            self.local_inertia = Mat3::zeros();
            self.local_inv_inertia = Mat3::zeros();
            self.world_inv_inertia = Mat3::zeros();
            self.inertia_singular = false;
            self.center_of_mass = world.position;
            self.local_center_offset = Vec3::zeros();
            return;
        };

        self.mass = properties.mass;
        self.inv_mass = 1.0 / properties.mass;
        self.center_of_mass = properties.center;
        self.local_center_offset = world.rotation.inverse() * (properties.center - world.position);

        let r = world.rotation.to_rotation_matrix().into_inner();
        self.local_inertia = r.transpose() * properties.inertia * r;
        match self.local_inertia.try_inverse() {
            Some(inverse) if inverse.iter().all(|v| v.is_finite()) => {
                self.local_inv_inertia = inverse;
                self.inertia_singular = false;
            }
            _ => {
                self.local_inv_inertia = Mat3::zeros();
                self.inertia_singular = true;
            }
        }
        self.update_world_inertia();
    }

    /// Rotate the body-frame inverse inertia into world space and apply locks
    pub(crate) fn update_world_inertia(&mut self) {
        if self.rotation_locked() || !self.is_dynamic() {
            self.world_inv_inertia = Mat3::zeros();
            return;
        }
        let r = self.rotation.to_rotation_matrix().into_inner();
        let mut world = r * self.local_inv_inertia * r.transpose();
        if self.is_2d() {
            // Only rotation about Z survives
            for i in 0..3 {
                for j in 0..3 {
                    if i < 2 || j < 2 {
                        world[(i, j)] = 0.0;
                    }
                }
            }
        }
        self.world_inv_inertia = world;
    }

    /// Angular response to `torque`, falling back to an iterative solve
    /// when the inertia tensor could not be inverted
    pub fn apply_inverse_inertia(&self, torque: &Vec3) -> Vec3 {
        if self.rotation_locked() || !self.is_dynamic() {
            return Vec3::zeros();
        }
        if !self.inertia_singular {
            return self.world_inv_inertia * torque;
        }
        let r = self.rotation.to_rotation_matrix().into_inner();
        let world_inertia = r * self.local_inertia * r.transpose();
        let mut result = solve_singular(&world_inertia, torque);
        if self.is_2d() {
            result.x = 0.0;
            result.y = 0.0;
        }
        result
    }

    /// Step velocities by the accumulated force and torque, then clear them
    pub(crate) fn integrate_velocity(&mut self, dt: f32, max_velocity: f32) {
        if self.is_dynamic() && !self.is_asleep() {
            let linear = self.inverse_mass_vector().component_mul(&self.force) * dt;
            let angular = self.apply_inverse_inertia(&self.torque) * dt;
            self.velocity += linear;
            self.angular_velocity += angular;
            self.clamp_velocities(max_velocity);
            self.apply_locks();
        }
        self.force = Vec3::zeros();
        self.torque = Vec3::zeros();
    }

    /// Clamp each velocity component to `[-max, max]`, reporting whether
    /// anything changed
    pub(crate) fn clamp_velocities(&mut self, max_velocity: f32) -> bool {
        let clamp = |v: &Vec3| v.map(|c| if c.is_nan() { 0.0 } else { c.clamp(-max_velocity, max_velocity) });
        let velocity = clamp(&self.velocity);
        let angular = clamp(&self.angular_velocity);
        let clamped = velocity != self.velocity || angular != self.angular_velocity;
        self.velocity = velocity;
        self.angular_velocity = angular;
        clamped
    }

    /// Advance the center of mass and orientation by the velocities.
    /// Returns the node's new world position and rotation.
    pub(crate) fn integrate_position(&mut self, dt: f32) -> (Vec3, Quat) {
        self.center_of_mass += self.velocity * dt;
        let (axis, speed) = attempt_normalize(&self.angular_velocity);
        if speed > 0.0 {
            self.rotation = quat_from_axis_angle(&axis, speed * dt) * self.rotation;
        }
        self.update_world_inertia();
        self.node_pose()
    }

    /// Move the body by a position correction
    pub(crate) fn translate_and_rotate(&mut self, translation: &Vec3, rotation: &Vec3) {
        self.center_of_mass += translation;
        let (axis, angle) = attempt_normalize(rotation);
        if angle > 0.0 {
            self.rotation = quat_from_axis_angle(&axis, angle) * self.rotation;
        }
        self.update_world_inertia();
    }

    /// World position and rotation of the node the body sits on
    pub fn node_pose(&self) -> (Vec3, Quat) {
        (self.center_of_mass - self.rotation * self.local_center_offset, self.rotation)
    }

    /// Re-sync the cached pose after the node was moved from outside
    pub(crate) fn sync_from_node(&mut self, world: &Transform) {
        self.rotation = world.rotation;
        self.center_of_mass = world.position + world.rotation * self.local_center_offset;
        self.update_world_inertia();
    }

    /// Advance the sleep timer. Returns whether the body is still slow
    /// enough to sleep.
    pub(crate) fn update_sleep_timer(&mut self, dt: f32, config: &SolverConfig) -> bool {
        let dt = if self.flags.contains(RigidBodyFlags::SLEEP_ACCUMULATED) { 0.0 } else { dt };
        self.flags.insert(RigidBodyFlags::SLEEP_ACCUMULATED);

        let linear = config.linear_sleep_epsilon;
        let angular = config.angular_sleep_epsilon;
        if self.allow_sleep()
            && self.velocity.norm_squared() <= linear * linear
            && self.angular_velocity.norm_squared() <= angular * angular
        {
            self.sleep_timer += dt;
            return true;
        }
        self.sleep_timer = 0.0;
        false
    }

    pub(crate) fn clear_sleep_accumulated(&mut self) {
        self.flags.remove(RigidBodyFlags::SLEEP_ACCUMULATED);
    }

    /// Zero velocities and forces and mark asleep
    pub(crate) fn put_to_sleep(&mut self) {
        self.flags.insert(RigidBodyFlags::ASLEEP);
        self.velocity = Vec3::zeros();
        self.angular_velocity = Vec3::zeros();
        self.force = Vec3::zeros();
        self.torque = Vec3::zeros();
    }

    /// Clear the sleep bit. Returns `true` if the body was asleep.
    pub(crate) fn internal_wake_up(&mut self) -> bool {
        if !self.is_asleep() {
            return false;
        }
        self.flags.remove(RigidBodyFlags::ASLEEP);
        self.sleep_timer = 0.0;
        true
    }

    /// Reset the sleep timer and wake. Returns `true` if the body was asleep.
    pub(crate) fn force_awake_internal(&mut self) -> bool {
        self.sleep_timer = 0.0;
        self.internal_wake_up()
    }

    /// Max out the timer and sleep
    pub(crate) fn force_asleep_internal(&mut self, time_to_sleep: f32) {
        self.sleep_timer = time_to_sleep;
        self.put_to_sleep();
    }

    /// Remember the transform a kinematic body had before this frame's writes
    pub(crate) fn record_old_transform(&mut self, world: &Transform) {
        self.old_position = world.position;
        self.old_rotation = world.rotation;
    }

    /// Derive kinematic velocities from the old and current transforms
    pub(crate) fn compute_kinematic_velocities(&mut self, world: &Transform, dt: f32) {
        if !self.is_kinematic() || dt <= 0.0 {
            return;
        }
        self.velocity = (world.position - self.old_position) / dt;
        self.angular_velocity = angular_velocity_approximation(&self.old_rotation, &world.rotation, dt);
        self.center_of_mass = world.position;
        self.rotation = world.rotation;
        self.old_position = world.position;
        self.old_rotation = world.rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    fn make_body(desc: &RigidBodyDesc) -> RigidBody {
        let mut nodes: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        RigidBody::new(nodes.insert(()), desc, &Transform::identity(), false)
    }

    #[test]
    fn test_mass_accumulator_parallel_axis() {
        let mut acc = MassAccumulator::new();
        acc.add(1.0, Vec3::new(1.0, 0.0, 0.0), Mat3::zeros());
        acc.add(1.0, Vec3::new(-1.0, 0.0, 0.0), Mat3::zeros());
        acc.add(0.0, Vec3::new(50.0, 0.0, 0.0), Mat3::identity());

        let props = acc.finish().unwrap_or(MassProperties {
            mass: 0.0,
            center: Vec3::repeat(9.0),
            inertia: Mat3::zeros(),
        });
        assert_relative_eq!(props.mass, 2.0);
        assert_relative_eq!(props.center, Vec3::zeros());
        assert_relative_eq!(props.inertia[(0, 0)], 0.0);
        assert_relative_eq!(props.inertia[(1, 1)], 2.0);
        assert_relative_eq!(props.inertia[(2, 2)], 2.0);
        assert!(MassAccumulator::new().finish().is_none());
    }

    #[test]
    fn test_solve_singular_falls_back_to_zero() {
        let singular = Mat3::from_diagonal(&Vec3::new(2.0, 2.0, 0.0));
        assert_relative_eq!(solve_singular(&singular, &Vec3::new(4.0, 0.0, 0.0)), Vec3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(solve_singular(&singular, &Vec3::new(0.0, 0.0, 1.0)), Vec3::zeros());
    }

    #[test]
    fn test_integrate_velocity_applies_and_clears_force() {
        let mut body = make_body(&RigidBodyDesc::dynamic());
        body.set_mass_properties(
            Some(MassProperties { mass: 2.0, center: Vec3::zeros(), inertia: Mat3::identity() }),
            &Transform::identity(),
        );
        body.apply_force(&Vec3::new(0.0, -20.0, 0.0));
        body.integrate_velocity(0.5, 1.0e10);
        assert_relative_eq!(body.velocity(), Vec3::new(0.0, -5.0, 0.0));
        assert_relative_eq!(body.force(), Vec3::zeros());
    }

    #[test]
    fn test_2d_mode_locks_z() {
        let mut body = make_body(
            &RigidBodyDesc::dynamic()
                .with_velocity(Vec3::new(1.0, 2.0, 3.0))
                .with_angular_velocity(Vec3::new(1.0, 1.0, 1.0))
                .with_mode_2d(Mode2D::Enabled),
        );
        assert_relative_eq!(body.velocity(), Vec3::new(1.0, 2.0, 0.0));
        assert_relative_eq!(body.angular_velocity(), Vec3::new(0.0, 0.0, 1.0));
        body.set_mode_2d(Mode2D::Disabled, true);
        assert!(!body.is_2d());
    }

    #[test]
    fn test_sleep_timer_accumulates_once_per_step() {
        let config = SolverConfig::default();
        let mut body = make_body(&RigidBodyDesc::dynamic());
        assert!(body.update_sleep_timer(0.25, &config));
        assert!(body.update_sleep_timer(0.25, &config));
        assert_relative_eq!(body.sleep_timer(), 0.25);

        body.clear_sleep_accumulated();
        body.set_velocity(Vec3::new(5.0, 0.0, 0.0));
        assert!(!body.update_sleep_timer(0.25, &config));
        assert_relative_eq!(body.sleep_timer(), 0.0);
    }

    #[test]
    fn test_put_to_sleep_and_wake() {
        let mut body = make_body(&RigidBodyDesc::dynamic().with_velocity(Vec3::x()));
        body.force_asleep_internal(1.0);
        assert!(body.is_asleep());
        assert_relative_eq!(body.velocity(), Vec3::zeros());
        assert!(body.force_awake_internal());
        assert!(!body.force_awake_internal());
        assert_relative_eq!(body.sleep_timer(), 0.0);
    }

    #[test]
    fn test_kinematic_velocity_from_transform_delta() {
        let mut body = make_body(&RigidBodyDesc::kinematic());
        let moved = Transform::from_position(Vec3::new(1.0, 0.0, 0.0));
        body.compute_kinematic_velocities(&moved, 0.5);
        assert_relative_eq!(body.velocity(), Vec3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(body.angular_velocity(), Vec3::zeros());
    }

    #[test]
    fn test_static_body_has_no_mass() {
        let mut body = make_body(&RigidBodyDesc::fixed().with_velocity(Vec3::x()));
        body.set_mass_properties(
            Some(MassProperties { mass: 2.0, center: Vec3::zeros(), inertia: Mat3::identity() }),
            &Transform::identity(),
        );
        assert_eq!(body.inverse_mass(), 0.0);
        assert_relative_eq!(body.velocity(), Vec3::zeros());
    }
}
