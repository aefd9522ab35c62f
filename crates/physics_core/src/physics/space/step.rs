//! The fixed-step pipeline

use std::collections::HashSet;

use log::{debug, error, trace, warn};

use super::PhysicsSpace;
use crate::config::MIN_SUB_STEPS;
use crate::events::{PhysicsEvent, PhysicsEventType};
use crate::foundation::collections::{BodyHandle, ColliderHandle, ContactHandle, NodeHandle};
use crate::foundation::math::{Sphere, Transform, Vec3};
use crate::physics::body::{KinematicState, RigidBody};
use crate::physics::broad_phase::{BroadPhaseProxy, ColliderPair};
use crate::physics::collider::{should_collide, Collider, ColliderFlags};
use crate::physics::contact::{ContactState, Manifold};
use crate::physics::effects::{EffectForce, PhysicsEffect};
use crate::physics::node::{collect_subtree, parent_world, PendingAction, PhysicsNode, TransformSource};
use crate::physics::solver::SolverContext;
use crate::physics::time_of_impact::{swept_bounds, time_of_impact, Motion, TimeOfImpactResult};

/// A collider travelling further than this fraction of its smallest half
/// extent in one sub-step is swept for time of impact
const CONTINUOUS_TRAVEL_FRACTION: f32 = 0.5;

/// Counters of the last sub-step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStatistics {
    /// Sub-steps run since the space was created
    pub steps: u64,
    /// Pairs reported by the broad phase
    pub candidate_pairs: usize,
    /// Pairs handed to the narrow phase or the time of impact query
    pub tested_pairs: usize,
    /// Manifolds fed to the contact manager
    pub manifolds: usize,
    /// Pairs caught by the time of impact query
    pub continuous_hits: usize,
    /// Islands the solver actually solved
    pub islands: usize,
    /// Contacts reclaimed at the end of the step
    pub destroyed_contacts: usize,
}

impl PhysicsSpace {
    /// Advance the space by one frame, split into the configured number of
    /// equal sub-steps.
    ///
    /// A sub-step count of zero skips the frame with a warning. Preview
    /// spaces only commit queued changes.
    pub fn update(&mut self, frame_dt: f32) {
        let sub_steps = self.config.sub_step_count;
        if sub_steps < MIN_SUB_STEPS {
            warn!("Physics space has no sub-steps; the frame was skipped");
            return;
        }
        if !frame_dt.is_finite() || frame_dt <= 0.0 {
            debug!("ignoring physics frame of {frame_dt} seconds");
            return;
        }

        self.flush();
        if self.is_preview() {
            return;
        }

        #[allow(clippy::cast_precision_loss)]
        let dt = frame_dt / sub_steps as f32;
        for _ in 0..sub_steps {
            self.iterate_timestep(dt);
        }
    }

    /// Run one sub-step of `dt` seconds
    pub fn iterate_timestep(&mut self, dt: f32) {
        self.statistics = StepStatistics { steps: self.statistics.steps + 1, ..StepStatistics::default() };

        self.apply_effects(dt);

        self.flush();
        let moving = self.update_kinematic_velocities(dt);

        let pairs = self.candidate_pairs();

        self.detect_contacts(&pairs, dt);

        let pre_solve = self.events.take_batched_where(|event| {
            matches!(event.event_type(), PhysicsEventType::PreSolve | PhysicsEventType::GroupPreSolve)
        });
        self.dispatch(pre_solve);
        self.flush();

        self.resolve(dt);

        self.update_kinematic_states(&moving);

        let moved = self.integrate_positions(dt);

        self.solve_positions(dt);
        self.publish_body_transforms(&moved);

        self.update_vehicle_positions(dt);

        self.flush();
        self.finish_step();
    }

    fn apply_effects(&mut self, dt: f32) {
        self.gravity.pre_calculate(dt);
        for effect in &mut self.effects {
            effect.pre_calculate(dt);
        }
        for effect in self.hierarchy_effects.values_mut().flatten() {
            effect.pre_calculate(dt);
        }

        let moving = |body: &RigidBody| body.is_dynamic() && !body.is_asleep();
        let global: Vec<&dyn PhysicsEffect> = std::iter::once(&self.gravity as &dyn PhysicsEffect)
            .chain(self.effects.iter().map(|effect| effect.as_ref()))
            .filter(|effect| effect.is_active())
            .collect();

        let mut forces: Vec<(BodyHandle, EffectForce)> = Vec::new();
        for (handle, body) in self.bodies.iter().filter(|(_, body)| moving(body)) {
            for effect in &global {
                forces.push((handle, effect.apply(body, dt)));
            }
        }

        let mut subtree = Vec::new();
        for (&root, effects) in &self.hierarchy_effects {
            subtree.clear();
            collect_subtree(&self.nodes, root, &mut subtree);
            for &node in &subtree {
                let Some(handle) = self.nodes.get(node).and_then(PhysicsNode::body) else {
                    continue;
                };
                let Some(body) = self.bodies.get(handle).filter(|body| moving(body)) else {
                    continue;
                };
                for effect in effects.iter().filter(|effect| effect.is_active()) {
                    forces.push((handle, effect.apply(body, dt)));
                }
            }
        }

        for (chassis, hook) in &mut self.vehicles {
            if let Some(body) = self.bodies.get(*chassis).filter(|body| moving(body)) {
                forces.push((*chassis, hook.update(body, dt)));
            }
        }

        for (handle, effect) in forces {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.apply_force(&effect.force);
                body.apply_torque(&effect.torque);
            }
        }

        let max_velocity = self.config.max_velocity;
        for body in self.bodies.values_mut() {
            body.clear_sleep_accumulated();
            body.integrate_velocity(dt, max_velocity);
        }
    }

    /// Derive velocities of kinematic bodies that were moved since the
    /// last sub-step. Returns the moved bodies.
    fn update_kinematic_velocities(&mut self, dt: f32) -> HashSet<BodyHandle> {
        let moving = std::mem::take(&mut self.moved_kinematics);
        for &handle in &moving {
            let Some(node) = self.bodies.get(handle).map(RigidBody::node) else {
                continue;
            };
            let world = self.nodes.get(node).map(|n| *n.world_transform()).unwrap_or_default();
            if let Some(body) = self.bodies.get_mut(handle) {
                body.compute_kinematic_velocities(&world, dt);
            }
        }
        moving
    }

    /// Eligible broad phase pairs, each ordered by collider id
    fn candidate_pairs(&mut self) -> Vec<ColliderPair> {
        let mut raw = Vec::new();
        self.broad_phase.self_query(&mut raw);
        self.statistics.candidate_pairs = raw.len();

        let view = self.collision_view();
        let mut seen = HashSet::with_capacity(raw.len());
        let mut pairs: Vec<ColliderPair> = raw
            .into_iter()
            .filter_map(|(a, b)| {
                let pair = canonical_pair(view.colliders.get(a)?, a, view.colliders.get(b)?, b);
                (seen.insert(pair) && should_collide(&view, pair.0, pair.1)).then_some(pair)
            })
            .collect();

        if self.config.deterministic {
            let id = |handle: ColliderHandle| view.colliders.get(handle).map_or(u32::MAX, Collider::id);
            pairs.sort_by_key(|&(a, b)| (id(a), id(b)));
        }
        pairs
    }

    /// Narrow phase, continuous sweeps, stale contact removal and island
    /// building
    fn detect_contacts(&mut self, pairs: &[ColliderPair], dt: f32) {
        self.contacts.begin_step();
        self.broad_phase.register_collisions();
        let mode_2d = self.config.mode_2d;

        let mut manifolds = Vec::new();
        let mut touching = HashSet::new();
        let mut tested = Vec::with_capacity(pairs.len());
        for &(a, b) in pairs {
            tested.push((a, b));
            if self.narrow_phase.test_collision(&self.colliders, a, b, &mut manifolds) {
                touching.insert((a, b));
            }
            for manifold in manifolds.drain(..) {
                self.statistics.manifolds += 1;
                if let Err(err) = self.contacts.add_manifold(&mut self.colliders, manifold, mode_2d, &mut self.events) {
                    error!("Could not track the contact between {a:?} and {b:?}: {err}");
                }
            }
        }

        self.detect_continuous(&touching, dt, &mut tested);
        self.statistics.tested_pairs = tested.len();
        self.remove_stale_contacts();
        self.broad_phase.record_frame_results(&tested);

        let dynamic: Vec<ColliderHandle> = self
            .colliders
            .iter()
            .filter(|(_, c)| c.active_body().and_then(|b| self.bodies.get(b)).is_some_and(RigidBody::is_dynamic))
            .map(|(handle, _)| handle)
            .collect();
        let ctx = SolverContext {
            bodies: &mut self.bodies,
            colliders: &self.colliders,
            contacts: &mut self.contacts,
            joints: &self.joints,
            config: &self.config.solver,
        };
        self.islands.build_islands(&ctx, &dynamic);
    }

    /// Sweep fast colliders against everything their motion passes and
    /// feed rewound impact manifolds to the contact manager. The solver
    /// lets such a contact close its gap within the step but no further.
    fn detect_continuous(&mut self, touching: &HashSet<ColliderPair>, dt: f32, tested: &mut Vec<ColliderPair>) {
        let fast = self.fast_colliders(dt);
        if fast.is_empty() {
            return;
        }
        let mode_2d = self.config.mode_2d;
        let mut seen = HashSet::new();
        let mut others = Vec::new();
        let mut results = Vec::new();

        for proxy in fast {
            others.clear();
            self.broad_phase.query_both(&proxy, &mut others);
            for &(x, y) in &others {
                let other = if x == proxy.collider { y } else { x };
                let (Some(collider), Some(other_collider)) = (self.colliders.get(proxy.collider), self.colliders.get(other))
                else {
                    continue;
                };
                if other == proxy.collider || collider.is_ghost() || other_collider.is_ghost() {
                    continue;
                }
                let pair = canonical_pair(collider, proxy.collider, other_collider, other);
                if touching.contains(&pair) || !seen.insert(pair) || !should_collide(&self.collision_view(), pair.0, pair.1) {
                    continue;
                }

                let (motion_a, motion_b) = (self.motion_of(pair.0), self.motion_of(pair.1));
                results.clear();
                if !time_of_impact(&self.colliders, pair.0, &motion_a, pair.1, &motion_b, dt, &mut results) {
                    continue;
                }
                tested.push(pair);
                self.statistics.continuous_hits += 1;
                trace!("time of impact {} between {:?} and {:?}", results[0].time, pair.0, pair.1);
                for result in results.drain(..) {
                    let manifold = rewind(result, &motion_a, &motion_b);
                    self.statistics.manifolds += 1;
                    if let Err(err) = self.contacts.add_manifold(&mut self.colliders, manifold, mode_2d, &mut self.events) {
                        error!("Could not track the swept contact between {:?} and {:?}: {err}", pair.0, pair.1);
                    }
                }
            }
        }
    }

    /// Proxies covering the motion of every collider that moves too far
    /// this sub-step for the discrete test
    fn fast_colliders(&self, dt: f32) -> Vec<BroadPhaseProxy> {
        self.colliders
            .iter()
            .filter_map(|(handle, collider)| {
                let body = collider.active_body().and_then(|b| self.bodies.get(b))?;
                if !body.is_dynamic() || body.is_asleep() {
                    return None;
                }
                let motion = Motion::of_body(body);
                let extents = collider.world_aabb().half_extents();
                let smallest = extents.x.min(extents.y).min(extents.z);
                let travel = motion.velocity.norm() * dt
                    + motion.angular_velocity.norm() * dt * collider.world_sphere().radius;
                if travel <= smallest * CONTINUOUS_TRAVEL_FRACTION {
                    return None;
                }
                let aabb = swept_bounds(collider, &motion, dt);
                Some(BroadPhaseProxy { collider: handle, aabb, sphere: Sphere::from_aabb(&aabb) })
            })
            .collect()
    }

    fn motion_of(&self, collider: ColliderHandle) -> Motion {
        self.colliders
            .get(collider)
            .and_then(Collider::active_body)
            .and_then(|b| self.bodies.get(b))
            .filter(|body| !body.is_static())
            .map_or_else(Motion::stationary, Motion::of_body)
    }

    /// End contacts the narrow phase stopped reporting. Contacts between
    /// resting colliders are kept since those pairs are not re-tested.
    fn remove_stale_contacts(&mut self) {
        let stale: Vec<ContactHandle> = {
            let view = self.collision_view();
            let resting = |handle: ColliderHandle| {
                view.colliders
                    .get(handle)
                    .is_some_and(|c| (view.is_asleep(c) && !c.is_uninitialized()) || view.is_static(c))
            };
            self.contacts
                .iter()
                .filter(|(_, contact)| contact.state() == ContactState::Active && !contact.was_updated())
                .filter(|(_, contact)| {
                    let [a, b] = contact.colliders();
                    let both_exist = view.colliders.contains_key(a) && view.colliders.contains_key(b);
                    !both_exist || !(resting(a) && resting(b))
                })
                .map(|(handle, _)| handle)
                .collect()
        };
        for handle in stale {
            let wake = self.contacts.remove(&mut self.colliders, handle, &mut self.events, false);
            self.wake_bodies(wake);
        }
    }

    fn resolve(&mut self, dt: f32) {
        let report = {
            let mut ctx = SolverContext {
                bodies: &mut self.bodies,
                colliders: &self.colliders,
                contacts: &mut self.contacts,
                joints: &self.joints,
                config: &self.config.solver,
            };
            self.islands.solve(&mut ctx, dt, self.config.allow_sleep, self.debug_flags)
        };
        self.statistics.islands = report.solved_islands;
        for handle in report.slept {
            self.events.send(PhysicsEvent::BodySlept(handle));
        }
        for handle in report.woken {
            self.events.send(PhysicsEvent::BodyAwoke(handle));
        }

        // Velocity written while asleep
        for (handle, body) in &mut self.bodies {
            let moving = body.velocity().norm_squared() > 0.0 || body.angular_velocity().norm_squared() > 0.0;
            if body.is_dynamic() && moving && body.internal_wake_up() {
                self.events.send(PhysicsEvent::BodyAwoke(handle));
            }
        }
    }

    /// Move kinematic bodies between the moving and stopped states. A body
    /// that stopped moving loses its derived velocity.
    fn update_kinematic_states(&mut self, moving: &HashSet<BodyHandle>) {
        let mut touched = Vec::new();
        for (handle, body) in &mut self.bodies {
            if !body.is_kinematic() {
                continue;
            }
            body.kinematic_state = if moving.contains(&handle) {
                touched.extend(body.colliders().iter().copied());
                KinematicState::Moving
            } else {
                match body.kinematic_state {
                    KinematicState::Moving => {
                        body.set_velocity(Vec3::zeros());
                        body.set_angular_velocity(Vec3::zeros());
                        KinematicState::Stopped
                    }
                    KinematicState::Stopped | KinematicState::Inactive => KinematicState::Inactive,
                }
            };
        }

        // Whatever rests on a moving kinematic body has to follow it
        let riders: Vec<BodyHandle> = touched
            .iter()
            .filter_map(|c| self.colliders.get(*c))
            .flat_map(|c| c.contact_edges().iter().map(|edge| edge.other))
            .filter_map(|other| self.colliders.get(other).and_then(Collider::active_body))
            .collect();
        for rider in riders {
            self.wake_bodies([Some(rider), None]);
        }
    }

    /// Integrate awake dynamic bodies and advance their sleep timers
    fn integrate_positions(&mut self, dt: f32) -> Vec<BodyHandle> {
        let mut moved = Vec::new();
        for (handle, body) in &mut self.bodies {
            if !body.is_dynamic() || body.is_asleep() {
                continue;
            }
            body.integrate_position(dt);
            body.update_sleep_timer(dt, &self.config.solver);
            moved.push(handle);
        }
        moved
    }

    fn solve_positions(&mut self, dt: f32) {
        let mut ctx = SolverContext {
            bodies: &mut self.bodies,
            colliders: &self.colliders,
            contacts: &mut self.contacts,
            joints: &self.joints,
            config: &self.config.solver,
        };
        self.islands.solve_positions(&mut ctx, dt);
    }

    /// Write integrated body poses back to their nodes, parents first
    fn publish_body_transforms(&mut self, moved: &[BodyHandle]) {
        let mut order: Vec<(u32, BodyHandle, NodeHandle)> = moved
            .iter()
            .filter_map(|&handle| {
                let node = self.bodies.get(handle)?.node();
                Some((self.nodes.get(node)?.depth(), handle, node))
            })
            .collect();
        order.sort_by_key(|&(depth, _, _)| depth);

        for (_, handle, node) in order {
            let Some((position, rotation)) = self.bodies.get(handle).map(RigidBody::node_pose) else {
                continue;
            };
            let Some(data) = self.nodes.get(node).filter(|n| !n.is_destroyed()) else {
                continue;
            };
            let world = Transform { position, rotation, scale: data.world_transform().scale };
            let local = parent_world(&self.nodes, data.parent()).inverse().combine(&world);
            if let Some(data) = self.nodes.get_mut(node) {
                data.local = local;
                data.world = world;
            }
            if let Err(err) = self.queue_action(node, PendingAction::Transform(TransformSource::Integration)) {
                warn!("Could not publish the transform of {handle:?}: {err}");
            }
        }
    }

    fn update_vehicle_positions(&mut self, dt: f32) {
        for (chassis, hook) in &mut self.vehicles {
            if let Some(body) = self.bodies.get(*chassis) {
                hook.update_positions(body, dt);
            }
        }
    }

    /// Deliver the step's events, then reclaim removed contacts
    fn finish_step(&mut self) {
        let events = self.events.take_batched();
        self.dispatch(events);
        self.statistics.destroyed_contacts = self.contacts.destroy_contacts();
        for collider in self.colliders.values_mut() {
            collider.set_flag(ColliderFlags::UNINITIALIZED, false);
        }
        self.flush();
        trace!("{:?}", self.statistics);
    }
}

fn canonical_pair(
    collider_a: &Collider,
    a: ColliderHandle,
    collider_b: &Collider,
    b: ColliderHandle,
) -> ColliderPair {
    if collider_a.id() <= collider_b.id() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Move an impact manifold back to the start of the sub-step. Its
/// penetration becomes the negative gap the pair closes before touching.
fn rewind(result: TimeOfImpactResult, motion_a: &Motion, motion_b: &Motion) -> Manifold {
    let TimeOfImpactResult { time, mut manifold } = result;
    for point in manifold.points_mut() {
        let closing = (motion_b.velocity - motion_a.velocity).dot(&point.normal) * time;
        point.world_a -= motion_a.velocity * time;
        point.world_b -= motion_b.velocity * time;
        point.penetration += closing;
    }
    manifold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhysicsSpaceConfig;
    use crate::physics::body::RigidBodyDesc;
    use crate::physics::collider::ColliderDesc;
    use crate::physics::shape::Shape;
    use approx::assert_relative_eq;

    fn body_at(space: &mut PhysicsSpace, position: Vec3, desc: &RigidBodyDesc) -> (NodeHandle, BodyHandle) {
        let node = space.create_node(None, Transform::from_position(position)).unwrap();
        assert!(space.add_collider(node, ColliderDesc::new(Shape::sphere(0.5))).is_ok());
        let body = space.add_rigid_body(node, desc).unwrap();
        (node, body)
    }

    #[test]
    fn test_gravity_accelerates_falling_body() {
        let mut space = PhysicsSpace::default();
        let (node, body) = body_at(&mut space, Vec3::new(0.0, 5.0, 0.0), &RigidBodyDesc::dynamic());

        space.update(1.0 / 60.0);

        let body = space.body(body).expect("body should survive the step");
        assert_relative_eq!(body.velocity().y, -10.0 / 60.0, epsilon = 1.0e-4);
        let world = space.world_transform(node).expect("node should survive the step");
        assert!(world.position.y < 5.0);
        assert_eq!(space.statistics().steps, 1);
    }

    #[test]
    fn test_zero_sub_steps_skip_the_frame() {
        let mut space = PhysicsSpace::default();
        let (node, _) = body_at(&mut space, Vec3::new(0.0, 5.0, 0.0), &RigidBodyDesc::dynamic());
        space.set_sub_step_count(0);

        space.update(1.0 / 60.0);

        assert_eq!(space.statistics().steps, 0);
        let world = space.world_transform(node).unwrap();
        assert_relative_eq!(world.position.y, 5.0);
    }

    #[test]
    fn test_sub_steps_split_the_frame() {
        let mut space = PhysicsSpace::new(PhysicsSpaceConfig::default().with_sub_steps(4));
        body_at(&mut space, Vec3::zeros(), &RigidBodyDesc::dynamic());
        space.update(1.0 / 60.0);
        assert_eq!(space.statistics().steps, 4);
    }

    #[test]
    fn test_preview_space_does_not_simulate() {
        let mut space = PhysicsSpace::default();
        let (node, body) = body_at(&mut space, Vec3::new(0.0, 5.0, 0.0), &RigidBodyDesc::dynamic());
        space.set_preview(true);

        space.update(1.0 / 60.0);

        assert!(space.body(body).is_some_and(|b| b.velocity() == Vec3::zeros()));
        assert!(space.world_transform(node).is_some_and(|w| w.position.y == 5.0));
    }

    #[test]
    fn test_kinematic_velocity_follows_transform_writes() {
        let mut space = PhysicsSpace::new(PhysicsSpaceConfig::default().with_gravity(Vec3::zeros()));
        let (node, body) = body_at(&mut space, Vec3::zeros(), &RigidBodyDesc::kinematic());
        space.flush();

        assert!(space.set_local_transform(node, Transform::from_position(Vec3::new(1.0, 0.0, 0.0))).is_ok());
        space.update(0.5);
        let velocity = space.body(body).map(RigidBody::velocity).unwrap();
        assert_relative_eq!(velocity, Vec3::new(2.0, 0.0, 0.0), epsilon = 1.0e-5);

        space.update(0.5);
        let velocity = space.body(body).map(RigidBody::velocity).unwrap();
        assert_relative_eq!(velocity, Vec3::zeros());
    }

    #[test]
    fn test_rewind_turns_impact_into_gap() {
        let mut manifold = Manifold::new(ColliderHandle::default(), ColliderHandle::default(), 0);
        manifold.push_point(crate::physics::contact::ManifoldPoint::new(
            Vec3::new(-0.025, 0.0, 0.0),
            Vec3::new(-0.025, 0.0, 0.0),
            Vec3::x(),
            0.0,
        ));
        let result = TimeOfImpactResult { time: 0.00875, manifold };
        let manifold = rewind(result, &Motion::linear(Vec3::new(100.0, 0.0, 0.0)), &Motion::stationary());

        let point = manifold.points().first().expect("rewound manifold lost its point");
        assert_relative_eq!(point.penetration, -0.875, epsilon = 1.0e-4);
        assert_relative_eq!(point.world_a.x, -0.9, epsilon = 1.0e-4);
        assert_relative_eq!(point.world_b.x, -0.025, epsilon = 1.0e-6);
    }
}


