//! # Contacts
//!
//! Narrow phase output arrives as [`Manifold`]s. The [`ContactManager`]
//! turns them into persistent [`Contact`]s whose identity survives from one
//! step to the next, so the solver can warm start and events can report a
//! start, a run of persisted frames and an end.
//!
//! Removal is two-phase. [`ContactManager::remove`] unlinks a contact and
//! batches its end event, but the memory stays readable until
//! [`ContactManager::destroy_contacts`] runs after event dispatch.

use log::{debug, trace};

use super::collider::{Collider, ContactEdge};
use crate::error::{PhysicsError, PhysicsResult};
use crate::events::{CollisionEventKind, PhysicsEventManager};
use crate::foundation::collections::{BodyHandle, BoundedPool, ColliderHandle, ContactHandle, HandleMap};
use crate::foundation::math::Vec3;

/// Most points kept per manifold
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// Distance under which an old point hands its impulses to a new one
const WARM_START_TOLERANCE: f32 = 0.05;

/// One point of contact between two surfaces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldPoint {
    /// Point on the first collider's surface
    pub world_a: Vec3,
    /// Point on the second collider's surface
    pub world_b: Vec3,
    /// Unit normal from the first collider towards the second
    pub normal: Vec3,
    /// Overlap depth along the normal; negative when apart
    pub penetration: f32,
    /// Accumulated normal impulse
    pub normal_impulse: f32,
    /// Accumulated friction impulses along the two tangents
    pub tangent_impulse: [f32; 2],
}

impl ManifoldPoint {
    /// Fresh point with no accumulated impulse
    pub fn new(world_a: Vec3, world_b: Vec3, normal: Vec3, penetration: f32) -> Self {
        Self {
            world_a,
            world_b,
            normal,
            penetration,
            normal_impulse: 0.0,
            tangent_impulse: [0.0; 2],
        }
    }

    /// Halfway between the two surface points
    pub fn midpoint(&self) -> Vec3 {
        (self.world_a + self.world_b) * 0.5
    }
}

/// Contact points between exactly two colliders
#[derive(Debug, Clone, PartialEq)]
pub struct Manifold {
    /// The two colliders, in the order the normal refers to
    pub colliders: [ColliderHandle; 2],
    /// Tells apart simultaneous manifolds of one pair (sub-shape indices)
    pub contact_id: u32,
    points: Vec<ManifoldPoint>,
}

impl Manifold {
    /// Empty manifold
    pub fn new(a: ColliderHandle, b: ColliderHandle, contact_id: u32) -> Self {
        Self { colliders: [a, b], contact_id, points: Vec::with_capacity(MAX_MANIFOLD_POINTS) }
    }

    /// Add a point. A full manifold replaces its shallowest point if the
    /// new one is deeper.
    pub fn push_point(&mut self, point: ManifoldPoint) {
        if self.points.len() < MAX_MANIFOLD_POINTS {
            self.points.push(point);
            return;
        }
        let shallowest = self
            .points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.penetration.total_cmp(&b.penetration))
            .map(|(i, p)| (i, p.penetration));
        if let Some((index, depth)) = shallowest {
            if point.penetration > depth {
                self.points[index] = point;
            }
        }
    }

    /// Contact points
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points
    }

    /// Contact points, mutable for the solver
    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points
    }

    /// Number of points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// No points left
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Normal of the first point
    pub fn normal(&self) -> Option<Vec3> {
        self.points.first().map(|p| p.normal)
    }

    /// Deepest penetration
    pub fn max_penetration(&self) -> f32 {
        self.points.iter().map(|p| p.penetration).fold(f32::NEG_INFINITY, f32::max)
    }

    /// Swap the collider order, flipping normals and surface points
    pub fn flip(&mut self) {
        self.colliders.swap(0, 1);
        for point in &mut self.points {
            std::mem::swap(&mut point.world_a, &mut point.world_b);
            point.normal = -point.normal;
        }
    }

    /// Keep only what a 2D simulation can resolve: points whose normal
    /// leans out of the XY plane are dropped, the rest are flattened.
    pub fn correct_for_2d(&mut self) {
        self.points.retain(|p| p.normal.z.abs() < 0.5);
        for point in &mut self.points {
            point.normal.z = 0.0;
            if let Some(n) = point.normal.try_normalize(1.0e-6) {
                point.normal = n;
            }
            point.world_a.z = 0.0;
            point.world_b.z = 0.0;
        }
    }

    /// Carry accumulated impulses over from last step's points
    pub fn transfer_impulses(&mut self, previous: &Self) {
        let flipped = previous.colliders[0] != self.colliders[0];
        for point in &mut self.points {
            let nearest = previous
                .points
                .iter()
                .map(|old| (old, (old.midpoint() - point.midpoint()).norm_squared()))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((old, distance)) = nearest {
                if distance <= WARM_START_TOLERANCE * WARM_START_TOLERANCE && !flipped {
                    point.normal_impulse = old.normal_impulse;
                    point.tangent_impulse = old.tangent_impulse;
                }
            }
        }
    }
}

/// Where a contact is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    /// Touching
    Active,
    /// Unlinked and waiting for [`ContactManager::destroy_contacts`]
    Removed,
}

/// Persistent wrapper around a manifold
#[derive(Debug, Clone)]
pub struct Contact {
    manifold: Manifold,
    state: ContactState,
    skip_resolution: bool,
    pub(crate) updated: bool,
    restitution: f32,
    friction: f32,
}

impl Contact {
    /// Current manifold
    pub const fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    pub(crate) fn manifold_mut(&mut self) -> &mut Manifold {
        &mut self.manifold
    }

    /// The two colliders
    pub const fn colliders(&self) -> [ColliderHandle; 2] {
        self.manifold.colliders
    }

    /// Lifecycle state
    pub const fn state(&self) -> ContactState {
        self.state
    }

    /// Feeds the solver: touching, resolvable and with at least one point
    pub fn is_active(&self) -> bool {
        self.state == ContactState::Active && !self.skip_resolution && !self.manifold.is_empty()
    }

    /// Detected but never resolved
    pub const fn skips_resolution(&self) -> bool {
        self.skip_resolution
    }

    /// Combined restitution of the two materials
    pub const fn restitution(&self) -> f32 {
        self.restitution
    }

    /// Combined friction of the two materials
    pub const fn friction(&self) -> f32 {
        self.friction
    }

    /// Reported by the narrow phase this step
    pub const fn was_updated(&self) -> bool {
        self.updated
    }
}

/// Owns every contact of a space
#[derive(Debug)]
pub struct ContactManager {
    contacts: BoundedPool<ContactHandle, Contact>,
    destroy_later: Vec<ContactHandle>,
}

impl ContactManager {
    /// Manager with a fixed pool size
    pub fn new(capacity: usize) -> Self {
        Self { contacts: BoundedPool::with_capacity(capacity), destroy_later: Vec::new() }
    }

    /// Look up a contact, including removed ones not yet destroyed
    pub fn get(&self, handle: ContactHandle) -> Option<&Contact> {
        self.contacts.get(handle)
    }

    pub(crate) fn get_mut(&mut self, handle: ContactHandle) -> Option<&mut Contact> {
        self.contacts.get_mut(handle)
    }

    /// Every stored contact
    pub fn iter(&self) -> impl Iterator<Item = (ContactHandle, &Contact)> {
        self.contacts.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ContactHandle, &mut Contact)> {
        self.contacts.iter_mut()
    }

    /// Stored contacts, removed ones included
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Nothing stored
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Pool size
    pub const fn capacity(&self) -> usize {
        self.contacts.capacity()
    }

    /// Contacts waiting for destruction
    pub fn pending_destruction(&self) -> &[ContactHandle] {
        &self.destroy_later
    }

    /// The live contact between `a` and `b` with the given manifold id.
    /// Walks the edges of whichever collider has fewer contacts.
    pub fn find(
        &self,
        colliders: &HandleMap<ColliderHandle, Collider>,
        a: ColliderHandle,
        b: ColliderHandle,
        contact_id: u32,
    ) -> Option<ContactHandle> {
        let (collider_a, collider_b) = (colliders.get(a)?, colliders.get(b)?);
        let (edges, other) = if collider_a.contact_count() <= collider_b.contact_count() {
            (&collider_a.contact_edges, b)
        } else {
            (&collider_b.contact_edges, a)
        };
        edges
            .iter()
            .filter(|edge| edge.other == other)
            .find(|edge| {
                self.contacts
                    .get(edge.contact)
                    .is_some_and(|c| c.manifold.contact_id == contact_id)
            })
            .map(|edge| edge.contact)
    }

    /// Clear the per-step update marks
    pub(crate) fn begin_step(&mut self) {
        for (_, contact) in self.contacts.iter_mut() {
            contact.updated = false;
        }
    }

    /// Create or update the contact for `manifold`, batching start or
    /// persisted events followed by a pre-solve event
    pub fn add_manifold(
        &mut self,
        colliders: &mut HandleMap<ColliderHandle, Collider>,
        mut manifold: Manifold,
        mode_2d: bool,
        events: &mut PhysicsEventManager,
    ) -> PhysicsResult<ContactHandle> {
        let [a, b] = manifold.colliders;
        if mode_2d {
            manifold.correct_for_2d();
        }

        let (skip_resolution, restitution, friction) = {
            let (Some(collider_a), Some(collider_b)) = (colliders.get(a), colliders.get(b)) else {
                return Err(PhysicsError::InvalidHandle("collider"));
            };
            (
                collider_a.group_instance.skip_resolution(&collider_b.group_instance)
                    || collider_a.not_collideable()
                    || collider_b.not_collideable(),
                collider_a.material().combined_restitution(collider_b.material()),
                collider_a.material().combined_friction(collider_b.material()),
            )
        };

        if let Some(handle) = self.find(colliders, a, b, manifold.contact_id) {
            if let Some(contact) = self.contacts.get_mut(handle) {
                if contact.manifold.colliders != manifold.colliders {
                    manifold.flip();
                }
                manifold.transfer_impulses(&contact.manifold);
                contact.manifold = manifold;
                contact.skip_resolution = skip_resolution;
                contact.restitution = restitution;
                contact.friction = friction;
                contact.updated = true;
            }
            trace!("contact persisted between {a:?} and {b:?}");
            self.batch(colliders, handle, CollisionEventKind::Persisted, events, false);
            self.batch(colliders, handle, CollisionEventKind::PreSolve, events, false);
            return Ok(handle);
        }

        let contact = Contact {
            manifold,
            state: ContactState::Active,
            skip_resolution,
            updated: true,
            restitution,
            friction,
        };
        let capacity = self.contacts.capacity();
        let handle = self
            .contacts
            .insert(contact)
            .map_err(|_| PhysicsError::ContactPoolExhausted { capacity })?;
        if let Some(collider) = colliders.get_mut(a) {
            collider.contact_edges.push(ContactEdge { contact: handle, other: b });
        }
        if let Some(collider) = colliders.get_mut(b) {
            collider.contact_edges.push(ContactEdge { contact: handle, other: a });
        }
        debug!("contact started between {a:?} and {b:?}");
        self.batch(colliders, handle, CollisionEventKind::Started, events, false);
        self.batch(colliders, handle, CollisionEventKind::PreSolve, events, false);
        Ok(handle)
    }

    /// Remove the contact matching `manifold`
    pub fn remove_manifold(
        &mut self,
        colliders: &mut HandleMap<ColliderHandle, Collider>,
        manifold: &Manifold,
        events: &mut PhysicsEventManager,
    ) -> [Option<BodyHandle>; 2] {
        let [a, b] = manifold.colliders;
        match self.find(colliders, a, b, manifold.contact_id) {
            Some(handle) => self.remove(colliders, handle, events, false),
            None => [None, None],
        }
    }

    /// Unlink a contact and batch its end event. The memory stays valid
    /// until [`Self::destroy_contacts`]. Returns the bodies to wake.
    pub fn remove(
        &mut self,
        colliders: &mut HandleMap<ColliderHandle, Collider>,
        handle: ContactHandle,
        events: &mut PhysicsEventManager,
        send_immediately: bool,
    ) -> [Option<BodyHandle>; 2] {
        let Some(contact) = self.contacts.get_mut(handle) else {
            return [None, None];
        };
        if contact.state == ContactState::Removed {
            return [None, None];
        }
        contact.state = ContactState::Removed;
        let pair = contact.manifold.colliders;

        let mut bodies = [None, None];
        for (slot, collider) in pair.iter().enumerate() {
            if let Some(collider) = colliders.get_mut(*collider) {
                collider.contact_edges.retain(|edge| edge.contact != handle);
                bodies[slot] = collider.active_body;
            }
        }
        debug!("contact ended between {:?} and {:?}", pair[0], pair[1]);
        self.batch(colliders, handle, CollisionEventKind::Ended, events, send_immediately);
        self.destroy_later.push(handle);
        bodies
    }

    /// Free every removed contact. Call only after events were dispatched.
    pub fn destroy_contacts(&mut self) -> usize {
        let count = self.destroy_later.len();
        for handle in self.destroy_later.drain(..) {
            self.contacts.remove(handle);
        }
        count
    }

    fn batch(
        &self,
        colliders: &HandleMap<ColliderHandle, Collider>,
        handle: ContactHandle,
        kind: CollisionEventKind,
        events: &mut PhysicsEventManager,
        send_immediately: bool,
    ) {
        if let Some(contact) = self.contacts.get(handle) {
            events.batch_collision(colliders, handle, contact, kind, send_immediately);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PhysicsEvent;
    use crate::foundation::collections::NodeHandle;
    use crate::physics::collider::ColliderDesc;
    use crate::physics::collision_group::{CollisionGroup, CollisionGroupInstance};
    use crate::physics::shape::Shape;
    use slotmap::SlotMap;

    fn handles() -> (ColliderHandle, ColliderHandle) {
        let mut map: SlotMap<ColliderHandle, ()> = SlotMap::with_key();
        (map.insert(()), map.insert(()))
    }

    fn spheres(count: u32) -> (HandleMap<ColliderHandle, Collider>, Vec<ColliderHandle>) {
        let mut nodes: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        let node = nodes.insert(());
        let instance = CollisionGroupInstance::permissive(CollisionGroup::default_group().id());
        let mut colliders = HandleMap::with_key();
        let handles = (0..count)
            .map(|id| colliders.insert(Collider::new(id, node, ColliderDesc::new(Shape::sphere(1.0)), instance)))
            .collect();
        (colliders, handles)
    }

    fn touching(a: ColliderHandle, b: ColliderHandle, normal: Vec3) -> Manifold {
        let mut manifold = Manifold::new(a, b, 0);
        manifold.push_point(ManifoldPoint::new(Vec3::zeros(), Vec3::zeros(), normal, 0.05));
        manifold
    }

    fn kinds(events: &PhysicsEventManager) -> Vec<CollisionEventKind> {
        events
            .batched()
            .iter()
            .filter_map(|event| match event {
                PhysicsEvent::Collision { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_contact_emptied_by_2d_correction_is_kept_inactive() {
        let (mut colliders, handles) = spheres(2);
        let (a, b) = (handles[0], handles[1]);
        let mut contacts = ContactManager::new(8);
        let mut events = PhysicsEventManager::new();

        let handle = contacts.add_manifold(&mut colliders, touching(a, b, Vec3::z()), true, &mut events).unwrap();
        let contact = contacts.get(handle).unwrap();
        assert!(contact.manifold().is_empty());
        assert_eq!(contact.state(), ContactState::Active);
        assert!(!contact.is_active());
        assert_eq!(colliders[a].contact_count(), 1);
        assert_eq!(colliders[b].contact_count(), 1);

        let again = contacts.add_manifold(&mut colliders, touching(a, b, Vec3::z()), true, &mut events).unwrap();
        assert_eq!(again, handle);
        assert_eq!(contacts.len(), 1);

        contacts.remove(&mut colliders, handle, &mut events, false);
        assert_eq!(
            kinds(&events),
            vec![
                CollisionEventKind::Started,
                CollisionEventKind::PreSolve,
                CollisionEventKind::Persisted,
                CollisionEventKind::PreSolve,
                CollisionEventKind::Ended,
            ]
        );
        assert!(contacts.get(handle).is_some());
        assert_eq!(contacts.destroy_contacts(), 1);
        assert!(contacts.get(handle).is_none());
    }

    #[test]
    fn test_full_pool_rejects_new_pairs_only() {
        let (mut colliders, handles) = spheres(3);
        let (a, b, c) = (handles[0], handles[1], handles[2]);
        let mut contacts = ContactManager::new(1);
        let mut events = PhysicsEventManager::new();

        let first = contacts.add_manifold(&mut colliders, touching(a, b, Vec3::y()), false, &mut events).unwrap();
        let result = contacts.add_manifold(&mut colliders, touching(a, c, Vec3::y()), false, &mut events);
        assert_eq!(result, Err(PhysicsError::ContactPoolExhausted { capacity: 1 }));
        assert_eq!(contacts.len(), 1);
        assert_eq!(colliders[a].contact_count(), 1);
        assert_eq!(colliders[c].contact_count(), 0);

        // The existing pair still persists in a full pool
        let persisted = contacts.add_manifold(&mut colliders, touching(a, b, Vec3::y()), false, &mut events).unwrap();
        assert_eq!(persisted, first);
    }

    #[test]
    fn test_manifold_keeps_deepest_points() {
        let (a, b) = handles();
        let mut manifold = Manifold::new(a, b, 0);
        for depth in [0.1, 0.5, 0.2, 0.3, 0.4] {
            manifold.push_point(ManifoldPoint::new(Vec3::zeros(), Vec3::zeros(), Vec3::y(), depth));
        }
        assert_eq!(manifold.point_count(), MAX_MANIFOLD_POINTS);
        assert!(manifold.points().iter().all(|p| p.penetration > 0.15));
        assert!((manifold.max_penetration() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_2d_correction_drops_out_of_plane_points() {
        let (a, b) = handles();
        let mut manifold = Manifold::new(a, b, 0);
        manifold.push_point(ManifoldPoint::new(Vec3::zeros(), Vec3::zeros(), Vec3::z(), 0.1));
        manifold.correct_for_2d();
        assert!(manifold.is_empty());

        let mut manifold = Manifold::new(a, b, 0);
        manifold.push_point(ManifoldPoint::new(Vec3::new(0.0, 0.0, 1.0), Vec3::zeros(), Vec3::y(), 0.1));
        manifold.correct_for_2d();
        assert_eq!(manifold.point_count(), 1);
        assert_eq!(manifold.points()[0].world_a.z, 0.0);
    }

    #[test]
    fn test_impulses_carry_over_to_nearby_points() {
        let (a, b) = handles();
        let mut old = Manifold::new(a, b, 0);
        let mut point = ManifoldPoint::new(Vec3::zeros(), Vec3::zeros(), Vec3::y(), 0.1);
        point.normal_impulse = 3.0;
        old.push_point(point);

        let mut new = Manifold::new(a, b, 0);
        new.push_point(ManifoldPoint::new(Vec3::new(0.01, 0.0, 0.0), Vec3::zeros(), Vec3::y(), 0.1));
        new.push_point(ManifoldPoint::new(Vec3::new(5.0, 0.0, 0.0), Vec3::zeros(), Vec3::y(), 0.1));
        new.transfer_impulses(&old);
        assert_eq!(new.points()[0].normal_impulse, 3.0);
        assert_eq!(new.points()[1].normal_impulse, 0.0);
    }

    #[test]
    fn test_flip_swaps_sides() {
        let (a, b) = handles();
        let mut manifold = Manifold::new(a, b, 7);
        manifold.push_point(ManifoldPoint::new(Vec3::x(), Vec3::y(), Vec3::z(), 0.1));
        manifold.flip();
        assert_eq!(manifold.colliders, [b, a]);
        assert_eq!(manifold.points()[0].world_a, Vec3::y());
        assert_eq!(manifold.points()[0].normal, -Vec3::z());
    }
}
