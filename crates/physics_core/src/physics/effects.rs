//! Force effects and vehicle hooks
//!
//! Effects run at the start of every sub-step and return the force and
//! torque they want applied to a body. Global effects act on every awake
//! dynamic body of the space; hierarchy effects act on the bodies at or
//! below the node they were attached to.

use std::fmt::Debug;

use crate::foundation::math::Vec3;

use super::body::RigidBody;

/// Force and torque produced by an effect
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectForce {
    /// Force through the center of mass
    pub force: Vec3,
    /// Torque about the center of mass
    pub torque: Vec3,
}

impl EffectForce {
    /// A force without torque
    pub fn force(force: Vec3) -> Self {
        Self { force, torque: Vec3::zeros() }
    }
}

/// A force field acting on rigid bodies
pub trait PhysicsEffect: Debug {
    /// Refresh cached state once per sub-step, before any body is visited
    fn pre_calculate(&mut self, _dt: f32) {}

    /// Force and torque for one body
    fn apply(&self, body: &RigidBody, dt: f32) -> EffectForce;

    /// Inactive effects are skipped
    fn is_active(&self) -> bool {
        true
    }
}

/// Constant acceleration applied to every body regardless of its mass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityEffect {
    /// Acceleration
    pub acceleration: Vec3,
    /// Whether the effect applies
    pub active: bool,
}

impl GravityEffect {
    /// Gravity with the given acceleration
    pub const fn new(acceleration: Vec3) -> Self {
        Self { acceleration, active: true }
    }
}

impl PhysicsEffect for GravityEffect {
    fn apply(&self, body: &RigidBody, _dt: f32) -> EffectForce {
        EffectForce::force(self.acceleration * body.mass())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// A vehicle driven by a rigid body chassis
pub trait VehicleHook: Debug {
    /// Forces on the chassis, called with the other effects
    fn update(&mut self, chassis: &RigidBody, dt: f32) -> EffectForce;

    /// Called once the position solve has settled the chassis
    fn update_positions(&mut self, chassis: &RigidBody, dt: f32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::NodeHandle;
    use crate::foundation::math::{Mat3, Transform};
    use crate::physics::body::{MassProperties, RigidBodyDesc};
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    #[test]
    fn test_gravity_scales_with_mass() {
        let mut nodes: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        let mut body = RigidBody::new(nodes.insert(()), &RigidBodyDesc::dynamic(), &Transform::identity(), false);
        body.set_mass_properties(
            Some(MassProperties { mass: 3.0, center: Vec3::zeros(), inertia: Mat3::identity() }),
            &Transform::identity(),
        );
        let gravity = GravityEffect::new(Vec3::new(0.0, -10.0, 0.0));
        let result = gravity.apply(&body, 1.0 / 60.0);
        assert_relative_eq!(result.force, Vec3::new(0.0, -30.0, 0.0));
        assert_relative_eq!(result.torque, Vec3::zeros());

        let inactive = GravityEffect { active: false, ..gravity };
        assert!(!inactive.is_active());
    }
}
