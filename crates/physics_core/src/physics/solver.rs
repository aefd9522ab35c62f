//! # Island Solver
//!
//! Dynamic bodies connected by active contacts or joints form islands.
//! Each awake island is solved with sequential impulses: a warm start from
//! last step's accumulated impulses, then a fixed number of velocity passes
//! over every contact point with restitution and Coulomb friction. After
//! positions are integrated, a projection pass pushes overlapping bodies
//! apart by a fraction of the remaining penetration.
//!
//! Static and kinematic bodies never join an island. They take part in
//! contacts as immovable anchors.

use std::collections::HashMap;

use bitflags::bitflags;
use log::{debug, trace};

use super::body::RigidBody;
use super::collider::Collider;
use super::contact::ContactManager;
use super::joint::Joint;
use crate::config::SolverConfig;
use crate::foundation::collections::{BodyHandle, ColliderHandle, ContactHandle, HandleMap, JointHandle};
use crate::foundation::math::utils::any_perpendicular;
use crate::foundation::math::{Mat3, Vec3};

/// Largest correction applied by one position pass
const MAX_LINEAR_CORRECTION: f32 = 0.2;

bitflags! {
    /// Switches for isolating parts of the solver while debugging
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SolverDebugFlags: u32 {
        /// Start every step from zero impulses
        const NO_WARM_START = 1 << 0;
        /// Ignore friction
        const NO_FRICTION = 1 << 1;
        /// Skip the position projection
        const NO_POSITION_CORRECTION = 1 << 2;
    }
}

/// Everything the solver reads or writes, borrowed from the space
#[derive(Debug)]
pub struct SolverContext<'a> {
    /// Rigid bodies
    pub bodies: &'a mut HandleMap<BodyHandle, RigidBody>,
    /// Colliders
    pub colliders: &'a HandleMap<ColliderHandle, Collider>,
    /// Contacts, whose accumulated impulses are written back
    pub contacts: &'a mut ContactManager,
    /// Joints
    pub joints: &'a HandleMap<JointHandle, Joint>,
    /// Tuning
    pub config: &'a SolverConfig,
}

/// Bodies whose sleep state the solver changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveReport {
    /// Put to sleep this step
    pub slept: Vec<BodyHandle>,
    /// Woken by contact with an awake island member
    pub woken: Vec<BodyHandle>,
    /// Islands that were actually solved
    pub solved_islands: usize,
}

/// A connected set of dynamic bodies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Island {
    /// Members, in the order their colliders were handed to `build_islands`
    pub bodies: Vec<BodyHandle>,
    /// Active contacts touching a member
    pub contacts: Vec<ContactHandle>,
    /// Valid joints touching a member
    pub joints: Vec<JointHandle>,
}

/// Partitions the dynamic world into islands and solves them
pub trait IslandManager: std::fmt::Debug {
    /// Rebuild islands over the given dynamic colliders and every current
    /// contact and joint
    fn build_islands(&mut self, ctx: &SolverContext<'_>, dynamic_colliders: &[ColliderHandle]);

    /// Velocity level solve. May put islands to sleep or wake them.
    fn solve(&mut self, ctx: &mut SolverContext<'_>, dt: f32, allow_sleep: bool, debug: SolverDebugFlags) -> SolveReport;

    /// Position level solve, run after positions were integrated
    fn solve_positions(&mut self, ctx: &mut SolverContext<'_>, dt: f32);

    /// Islands from the last build
    fn islands(&self) -> &[Island];
}

#[derive(Debug, Clone)]
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self { parent: (0..len).collect(), rank: vec![0; len] }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

/// Velocity state of one body while an island is solved
#[derive(Debug, Clone, Copy)]
struct VelocityState {
    handle: Option<BodyHandle>,
    velocity: Vec3,
    angular_velocity: Vec3,
    inv_mass: Vec3,
    inv_inertia: Mat3,
    center: Vec3,
}

impl VelocityState {
    fn fixed() -> Self {
        Self {
            handle: None,
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            inv_mass: Vec3::zeros(),
            inv_inertia: Mat3::zeros(),
            center: Vec3::zeros(),
        }
    }

    fn of(handle: BodyHandle, body: &RigidBody) -> Self {
        let (inv_mass, inv_inertia) = if body.is_dynamic() {
            // Sampling the basis keeps the singular inertia fallback in play
            let columns = [Vec3::x(), Vec3::y(), Vec3::z()].map(|axis| body.apply_inverse_inertia(&axis));
            (body.inverse_mass_vector(), Mat3::from_columns(&columns))
        } else {
            (Vec3::zeros(), Mat3::zeros())
        };
        Self {
            handle: Some(handle),
            velocity: body.velocity(),
            angular_velocity: body.angular_velocity(),
            inv_mass,
            inv_inertia,
            center: body.center_of_mass(),
        }
    }

    fn point_velocity(&self, r: &Vec3) -> Vec3 {
        self.velocity + self.angular_velocity.cross(r)
    }

    fn apply(&mut self, impulse: &Vec3, r: &Vec3) {
        self.velocity += self.inv_mass.component_mul(impulse);
        self.angular_velocity += self.inv_inertia * r.cross(impulse);
    }

    fn effective_mass(&self, r: &Vec3, direction: &Vec3) -> f32 {
        let rn = r.cross(direction);
        direction.dot(&self.inv_mass.component_mul(direction)) + (self.inv_inertia * rn).dot(&rn)
    }
}

#[derive(Debug, Clone, Copy)]
struct PointConstraint {
    contact: ContactHandle,
    point: usize,
    a: usize,
    b: usize,
    r_a: Vec3,
    r_b: Vec3,
    normal: Vec3,
    tangents: [Vec3; 2],
    normal_mass: f32,
    tangent_mass: [f32; 2],
    bias: f32,
    friction: f32,
    normal_impulse: f32,
    tangent_impulse: [f32; 2],
}

/// Contact anchors kept in body space for the position pass
#[derive(Debug, Clone, Copy)]
struct PositionConstraint {
    a: Option<BodyHandle>,
    b: Option<BodyHandle>,
    local_a: Vec3,
    local_b: Vec3,
    normal: Vec3,
}

fn to_local(body: Option<&RigidBody>, world: &Vec3) -> Vec3 {
    body.map_or(*world, |body| body.rotation().inverse() * (world - body.center_of_mass()))
}

fn to_world(body: Option<&RigidBody>, local: &Vec3) -> Vec3 {
    body.map_or(*local, |body| body.center_of_mass() + body.rotation() * local)
}

/// Default [`IslandManager`]: union-find islands and sequential impulses
#[derive(Debug, Default)]
pub struct IslandSolver {
    islands: Vec<Island>,
    positions: Vec<PositionConstraint>,
}

impl IslandSolver {
    /// Empty solver
    pub fn new() -> Self {
        Self::default()
    }

    fn dynamic_body(ctx: &SolverContext<'_>, collider: ColliderHandle) -> Option<BodyHandle> {
        let body = ctx.colliders.get(collider)?.active_body?;
        ctx.bodies.get(body).filter(|b| b.is_dynamic()).map(|_| body)
    }

    fn solve_island(&mut self, ctx: &mut SolverContext<'_>, island: &Island, dt: f32, debug: SolverDebugFlags) {
        let config = ctx.config;
        let mut states = vec![VelocityState::fixed()];
        let mut slots: HashMap<BodyHandle, usize> = HashMap::new();
        let mut slot_of = |handle: Option<BodyHandle>, states: &mut Vec<VelocityState>| -> usize {
            let Some(handle) = handle else {
                return 0;
            };
            if let Some(&slot) = slots.get(&handle) {
                return slot;
            }
            let Some(body) = ctx.bodies.get(handle) else {
                return 0;
            };
            states.push(VelocityState::of(handle, body));
            slots.insert(handle, states.len() - 1);
            states.len() - 1
        };

        let mut constraints = Vec::new();
        for &handle in &island.contacts {
            let Some(contact) = ctx.contacts.get(handle).filter(|c| c.is_active()) else {
                continue;
            };
            let [collider_a, collider_b] = contact.colliders();
            let body_a = ctx.colliders.get(collider_a).and_then(|c| c.active_body);
            let body_b = ctx.colliders.get(collider_b).and_then(|c| c.active_body);
            let a = slot_of(body_a, &mut states);
            let b = slot_of(body_b, &mut states);

            for (index, point) in contact.manifold().points().iter().enumerate() {
                let anchor = point.midpoint();
                let r_a = if a == 0 { Vec3::zeros() } else { anchor - states[a].center };
                let r_b = if b == 0 { Vec3::zeros() } else { anchor - states[b].center };
                let normal = point.normal;
                let t1 = any_perpendicular(&normal);
                let tangents = [t1, normal.cross(&t1)];

                let mass = |direction: &Vec3| {
                    let k = states[a].effective_mass(&r_a, direction) + states[b].effective_mass(&r_b, direction);
                    if k > 0.0 { 1.0 / k } else { 0.0 }
                };
                let relative = states[b].point_velocity(&r_b) - states[a].point_velocity(&r_a);
                let approach = relative.dot(&normal);
                // Separated points from a time of impact query may close the gap but no more
                let bias = if point.penetration < 0.0 && dt > 0.0 {
                    point.penetration / dt
                } else if approach < -config.restitution_threshold {
                    -contact.restitution() * approach
                } else {
                    0.0
                };
                let warm = !debug.contains(SolverDebugFlags::NO_WARM_START);

                constraints.push(PointConstraint {
                    contact: handle,
                    point: index,
                    a,
                    b,
                    r_a,
                    r_b,
                    normal,
                    tangents,
                    normal_mass: mass(&normal),
                    tangent_mass: [mass(&tangents[0]), mass(&tangents[1])],
                    bias,
                    friction: if debug.contains(SolverDebugFlags::NO_FRICTION) { 0.0 } else { contact.friction() },
                    normal_impulse: if warm { point.normal_impulse } else { 0.0 },
                    tangent_impulse: if warm { point.tangent_impulse } else { [0.0; 2] },
                });
                self.positions.push(PositionConstraint {
                    a: body_a.filter(|_| a != 0),
                    b: body_b.filter(|_| b != 0),
                    local_a: to_local(body_a.and_then(|h| ctx.bodies.get(h)), &point.world_a),
                    local_b: to_local(body_b.and_then(|h| ctx.bodies.get(h)), &point.world_b),
                    normal,
                });
            }
        }

        for c in &constraints {
            let impulse = c.normal * c.normal_impulse + c.tangents[0] * c.tangent_impulse[0] + c.tangents[1] * c.tangent_impulse[1];
            states[c.a].apply(&-impulse, &c.r_a);
            states[c.b].apply(&impulse, &c.r_b);
        }

        for _ in 0..config.velocity_iterations {
            for c in &mut constraints {
                for axis in 0..2 {
                    let relative = states[c.b].point_velocity(&c.r_b) - states[c.a].point_velocity(&c.r_a);
                    let limit = c.friction * c.normal_impulse;
                    let delta = -relative.dot(&c.tangents[axis]) * c.tangent_mass[axis];
                    let total = (c.tangent_impulse[axis] + delta).clamp(-limit, limit);
                    let applied = c.tangents[axis] * (total - c.tangent_impulse[axis]);
                    c.tangent_impulse[axis] = total;
                    states[c.a].apply(&-applied, &c.r_a);
                    states[c.b].apply(&applied, &c.r_b);
                }

                let relative = states[c.b].point_velocity(&c.r_b) - states[c.a].point_velocity(&c.r_a);
                let delta = (c.bias - relative.dot(&c.normal)) * c.normal_mass;
                let total = (c.normal_impulse + delta).max(0.0);
                let applied = c.normal * (total - c.normal_impulse);
                c.normal_impulse = total;
                states[c.a].apply(&-applied, &c.r_a);
                states[c.b].apply(&applied, &c.r_b);
            }
        }

        for c in &constraints {
            if let Some(point) = ctx.contacts.get_mut(c.contact).and_then(|contact| contact.manifold_mut().points_mut().get_mut(c.point)) {
                point.normal_impulse = c.normal_impulse;
                point.tangent_impulse = c.tangent_impulse;
            }
        }
        for state in &states {
            let Some(body) = state.handle.and_then(|h| ctx.bodies.get_mut(h)) else {
                continue;
            };
            if body.is_dynamic() {
                body.set_velocity(state.velocity);
                body.set_angular_velocity(state.angular_velocity);
            }
        }
        trace!("solved island of {} bodies, {} points over dt {dt}", island.bodies.len(), constraints.len());
    }
}

impl IslandManager for IslandSolver {
    fn build_islands(&mut self, ctx: &SolverContext<'_>, dynamic_colliders: &[ColliderHandle]) {
        let mut index: HashMap<BodyHandle, usize> = HashMap::new();
        let mut order: Vec<BodyHandle> = Vec::new();
        for &collider in dynamic_colliders {
            if let Some(body) = Self::dynamic_body(ctx, collider) {
                index.entry(body).or_insert_with(|| {
                    order.push(body);
                    order.len() - 1
                });
            }
        }

        let mut sets = UnionFind::new(order.len());
        let slot = |collider: ColliderHandle| Self::dynamic_body(ctx, collider).and_then(|b| index.get(&b).copied());

        let mut contacts: Vec<(ContactHandle, usize)> = Vec::new();
        for (handle, contact) in ctx.contacts.iter() {
            if !contact.is_active() {
                continue;
            }
            let [a, b] = contact.colliders();
            match (slot(a), slot(b)) {
                (Some(i), Some(j)) => {
                    sets.union(i, j);
                    contacts.push((handle, i));
                }
                (Some(i), None) | (None, Some(i)) => contacts.push((handle, i)),
                (None, None) => {}
            }
        }

        let mut joints: Vec<(JointHandle, usize)> = Vec::new();
        for (handle, joint) in ctx.joints.iter() {
            if !joint.is_valid() {
                continue;
            }
            let [a, b] = joint.colliders();
            match (slot(a), slot(b)) {
                (Some(i), Some(j)) => {
                    sets.union(i, j);
                    joints.push((handle, i));
                }
                (Some(i), None) | (None, Some(i)) => joints.push((handle, i)),
                (None, None) => {}
            }
        }

        self.islands.clear();
        let mut island_of_root: HashMap<usize, usize> = HashMap::new();
        let mut island_of_slot = vec![0; order.len()];
        for (i, body) in order.iter().enumerate() {
            let root = sets.find(i);
            let island = *island_of_root.entry(root).or_insert_with(|| {
                self.islands.push(Island::default());
                self.islands.len() - 1
            });
            island_of_slot[i] = island;
            self.islands[island].bodies.push(*body);
        }
        for (handle, i) in contacts {
            self.islands[island_of_slot[i]].contacts.push(handle);
        }
        for (handle, i) in joints {
            self.islands[island_of_slot[i]].joints.push(handle);
        }
        debug!("built {} islands over {} bodies", self.islands.len(), order.len());
    }

    fn solve(&mut self, ctx: &mut SolverContext<'_>, dt: f32, allow_sleep: bool, debug: SolverDebugFlags) -> SolveReport {
        let mut report = SolveReport::default();
        self.positions.clear();
        let islands = std::mem::take(&mut self.islands);

        for island in &islands {
            let asleep = island
                .bodies
                .iter()
                .filter(|&&b| ctx.bodies.get(b).is_some_and(RigidBody::is_asleep))
                .count();
            if asleep == island.bodies.len() {
                continue;
            }
            if asleep > 0 {
                for &handle in &island.bodies {
                    if ctx.bodies.get_mut(handle).is_some_and(RigidBody::internal_wake_up) {
                        report.woken.push(handle);
                    }
                }
            }

            let time_to_sleep = ctx.config.time_to_sleep;
            let rested = island.bodies.iter().all(|&b| {
                ctx.bodies
                    .get(b)
                    .is_some_and(|body| body.allow_sleep() && body.sleep_timer() >= time_to_sleep)
            });
            if allow_sleep && rested {
                for &handle in &island.bodies {
                    if let Some(body) = ctx.bodies.get_mut(handle) {
                        body.put_to_sleep();
                        report.slept.push(handle);
                    }
                }
                continue;
            }

            self.solve_island(ctx, island, dt, debug);
            report.solved_islands += 1;
        }

        self.islands = islands;
        if debug.contains(SolverDebugFlags::NO_POSITION_CORRECTION) {
            self.positions.clear();
        }
        report
    }

    fn solve_positions(&mut self, ctx: &mut SolverContext<'_>, _dt: f32) {
        let config = ctx.config;
        for _ in 0..config.position_iterations {
            for c in &self.positions {
                let body_a = c.a.and_then(|h| ctx.bodies.get(h));
                let body_b = c.b.and_then(|h| ctx.bodies.get(h));
                let point_a = to_world(body_a, &c.local_a);
                let point_b = to_world(body_b, &c.local_b);
                let separation = (point_b - point_a).dot(&c.normal);
                let error = (separation + config.penetration_slop).clamp(-MAX_LINEAR_CORRECTION, 0.0);
                if error >= 0.0 {
                    continue;
                }

                let state_a = body_a.zip(c.a).map_or(VelocityState::fixed(), |(b, h)| VelocityState::of(h, b));
                let state_b = body_b.zip(c.b).map_or(VelocityState::fixed(), |(b, h)| VelocityState::of(h, b));
                let r_a = if c.a.is_some() { point_a - state_a.center } else { Vec3::zeros() };
                let r_b = if c.b.is_some() { point_b - state_b.center } else { Vec3::zeros() };
                let k = state_a.effective_mass(&r_a, &c.normal) + state_b.effective_mass(&r_b, &c.normal);
                if k <= 0.0 {
                    continue;
                }
                let impulse = c.normal * (-config.baumgarte * error / k);

                for (handle, state, r, sign) in [(c.a, &state_a, r_a, -1.0), (c.b, &state_b, r_b, 1.0)] {
                    let Some(body) = handle.and_then(|h| ctx.bodies.get_mut(h)) else {
                        continue;
                    };
                    if body.is_dynamic() {
                        let translation = state.inv_mass.component_mul(&impulse) * sign;
                        let rotation = state.inv_inertia * r.cross(&impulse) * sign;
                        body.translate_and_rotate(&translation, &rotation);
                    }
                }
            }
        }
    }

    fn islands(&self) -> &[Island] {
        &self.islands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PhysicsEventManager;
    use crate::foundation::collections::NodeHandle;
    use crate::foundation::math::Transform;
    use crate::physics::body::{MassProperties, RigidBodyDesc};
    use crate::physics::collider::ColliderDesc;
    use crate::physics::collision_group::{CollisionGroupId, CollisionGroupInstance};
    use crate::physics::contact::{Manifold, ManifoldPoint};
    use crate::physics::shape::Shape;
    use approx::assert_relative_eq;

    struct World {
        bodies: HandleMap<BodyHandle, RigidBody>,
        colliders: HandleMap<ColliderHandle, Collider>,
        contacts: ContactManager,
        joints: HandleMap<JointHandle, Joint>,
        nodes: HandleMap<NodeHandle, ()>,
    }

    impl World {
        fn new() -> Self {
            Self {
                bodies: HandleMap::with_key(),
                colliders: HandleMap::with_key(),
                contacts: ContactManager::new(16),
                joints: HandleMap::with_key(),
                nodes: HandleMap::with_key(),
            }
        }

        fn ball(&mut self, position: Vec3, velocity: Vec3) -> (BodyHandle, ColliderHandle) {
            let world = Transform::from_position(position);
            let node = self.nodes.insert(());
            let mut body = RigidBody::new(node, &RigidBodyDesc::dynamic().with_velocity(velocity), &world, false);
            body.set_mass_properties(
                Some(MassProperties { mass: 1.0, center: position, inertia: Mat3::identity() * 0.4 }),
                &world,
            );
            let body = self.bodies.insert(body);
            let collider = self.collider(Shape::sphere(1.0), Some(body));
            (body, collider)
        }

        fn collider(&mut self, shape: Shape, body: Option<BodyHandle>) -> ColliderHandle {
            let node = self.nodes.insert(());
            let mut collider = Collider::new(
                self.colliders.len() as u32 + 1,
                node,
                ColliderDesc::new(shape),
                CollisionGroupInstance::permissive(CollisionGroupId::from_name("DefaultGroup")),
            );
            collider.active_body = body;
            self.colliders.insert(collider)
        }

        fn touch(&mut self, a: ColliderHandle, b: ColliderHandle, point: Vec3, normal: Vec3) {
            let mut manifold = Manifold::new(a, b, 0);
            manifold.push_point(ManifoldPoint::new(point, point, normal, 0.0));
            let mut events = PhysicsEventManager::new();
            assert!(self.contacts.add_manifold(&mut self.colliders, manifold, false, &mut events).is_ok());
        }

        fn context<'a>(&'a mut self, config: &'a SolverConfig) -> SolverContext<'a> {
            SolverContext {
                bodies: &mut self.bodies,
                colliders: &self.colliders,
                contacts: &mut self.contacts,
                joints: &self.joints,
                config,
            }
        }
    }

    #[test]
    fn test_union_find_merges_sets() {
        let mut sets = UnionFind::new(4);
        sets.union(0, 1);
        sets.union(2, 3);
        assert_eq!(sets.find(0), sets.find(1));
        assert_ne!(sets.find(1), sets.find(2));
        sets.union(1, 3);
        assert_eq!(sets.find(0), sets.find(2));
    }

    #[test]
    fn test_islands_follow_contacts() {
        let mut world = World::new();
        let (_, a) = world.ball(Vec3::zeros(), Vec3::zeros());
        let (_, b) = world.ball(Vec3::new(2.0, 0.0, 0.0), Vec3::zeros());
        let (_, c) = world.ball(Vec3::new(10.0, 0.0, 0.0), Vec3::zeros());
        world.touch(a, b, Vec3::new(1.0, 0.0, 0.0), Vec3::x());

        let config = SolverConfig::default();
        let mut solver = IslandSolver::new();
        solver.build_islands(&world.context(&config), &[a, b, c]);
        assert_eq!(solver.islands().len(), 2);
        assert_eq!(solver.islands()[0].bodies.len(), 2);
        assert_eq!(solver.islands()[0].contacts.len(), 1);
        assert!(solver.islands()[1].contacts.is_empty());
    }

    #[test]
    fn test_falling_ball_stops_on_static_ground() {
        let mut world = World::new();
        let (body, ball) = world.ball(Vec3::zeros(), Vec3::new(0.0, -5.0, 0.0));
        let ground = world.collider(Shape::cuboid(Vec3::new(10.0, 0.5, 10.0)), None);
        world.touch(ball, ground, Vec3::new(0.0, -1.0, 0.0), -Vec3::y());

        let config = SolverConfig::default();
        let mut solver = IslandSolver::new();
        let mut ctx = world.context(&config);
        solver.build_islands(&ctx, &[ball]);
        let report = solver.solve(&mut ctx, 1.0 / 60.0, true, SolverDebugFlags::empty());
        assert_eq!(report.solved_islands, 1);

        let velocity = world.bodies[body].velocity();
        assert_relative_eq!(velocity.y, 0.0, epsilon = 1e-4);
        let impulse = world.contacts.iter().next().map_or(0.0, |(_, c)| c.manifold().points()[0].normal_impulse);
        assert_relative_eq!(impulse, 5.0, epsilon = 1e-3);
    }

    #[test]
    fn test_rested_island_falls_asleep() {
        let mut world = World::new();
        let (body, ball) = world.ball(Vec3::zeros(), Vec3::zeros());
        let config = SolverConfig::default().with_time_to_sleep(0.0);
        let mut solver = IslandSolver::new();
        let mut ctx = world.context(&config);
        solver.build_islands(&ctx, &[ball]);
        let report = solver.solve(&mut ctx, 1.0 / 60.0, true, SolverDebugFlags::empty());
        assert_eq!(report.slept, vec![body]);
        assert!(world.bodies[body].is_asleep());

        let mut ctx = world.context(&config);
        let report = solver.solve(&mut ctx, 1.0 / 60.0, false, SolverDebugFlags::empty());
        assert!(report.slept.is_empty());
        assert_eq!(report.solved_islands, 0);
    }

    #[test]
    fn test_position_pass_separates_overlap() {
        let mut world = World::new();
        let (body, ball) = world.ball(Vec3::zeros(), Vec3::zeros());
        let ground = world.collider(Shape::cuboid(Vec3::new(10.0, 0.5, 10.0)), None);
        let mut manifold = Manifold::new(ball, ground, 0);
        manifold.push_point(ManifoldPoint::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -0.9, 0.0), -Vec3::y(), 0.1));
        let mut events = PhysicsEventManager::new();
        assert!(world.contacts.add_manifold(&mut world.colliders, manifold, false, &mut events).is_ok());

        let config = SolverConfig::default();
        let mut solver = IslandSolver::new();
        let mut ctx = world.context(&config);
        solver.build_islands(&ctx, &[ball]);
        solver.solve(&mut ctx, 1.0 / 60.0, false, SolverDebugFlags::empty());
        solver.solve_positions(&mut ctx, 1.0 / 60.0);
        assert!(world.bodies[body].center_of_mass().y > 0.0);
    }
}
