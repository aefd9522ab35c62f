//! Committing queued node actions and keeping body links current

use std::collections::HashSet;

use log::trace;

use super::PhysicsSpace;
use crate::error::PhysicsResult;
use crate::foundation::collections::{BodyHandle, ColliderHandle, NodeHandle};
use crate::physics::body::MassAccumulator;
use crate::physics::broad_phase::{BroadPhaseKind, BroadPhaseProxy};
use crate::physics::collider::{Collider, ColliderFlags};
use crate::physics::node::{collect_subtree, parent_world, BroadPhaseAction, PendingAction, TransformSource};

impl PhysicsSpace {
    /// Commit every queued node action.
    ///
    /// World transforms are recomputed parents first over the subtrees of
    /// queued nodes, then body masses, then broad phase membership.
    /// Destroyed nodes are reclaimed last.
    pub fn flush(&mut self) {
        if self.queue.is_empty() && self.retired_proxies.is_empty() {
            return;
        }
        let queued = self.queue.take_sorted(&self.nodes);
        let mut visited = HashSet::new();
        let mut mass_nodes = Vec::new();
        let mut moved = Vec::new();
        let mut membership = Vec::new();
        let mut destroyed = Vec::new();

        for handle in queued {
            let Some(node) = self.nodes.get_mut(handle) else {
                continue;
            };
            let pending = node.take_pending();
            if node.is_destroyed() {
                destroyed.push(handle);
                continue;
            }
            if let Some(source) = pending.transform {
                if !visited.contains(&handle) {
                    self.update_subtree_transforms(handle, source, &mut visited, &mut mass_nodes, &mut moved);
                }
            }
            if pending.mass {
                mass_nodes.push(handle);
            }
            if let Some(action) = pending.broad_phase {
                membership.push((handle, action));
            }
        }

        for body in self.mass_targets(&mass_nodes) {
            self.recompute_mass(body);
        }

        let mut synced = HashSet::new();
        for (node, action) in membership {
            let Some(collider) = self.nodes.get(node).and_then(|n| n.collider()) else {
                continue;
            };
            match action {
                BroadPhaseAction::Remove => {
                    self.broad_phase.remove(collider);
                    if let Some(data) = self.colliders.get_mut(collider) {
                        data.set_flag(ColliderFlags::IN_BROAD_PHASE | ColliderFlags::IN_DYNAMIC_BROAD_PHASE, false);
                    }
                }
                BroadPhaseAction::Insert | BroadPhaseAction::Update => {
                    self.sync_proxy(collider);
                    synced.insert(collider);
                }
            }
        }
        for node in moved {
            let Some(collider) = self.nodes.get(node).and_then(|n| n.collider()) else {
                continue;
            };
            let in_broad_phase = self
                .colliders
                .get(collider)
                .is_some_and(|c| c.flags().contains(ColliderFlags::IN_BROAD_PHASE));
            if in_broad_phase && synced.insert(collider) {
                self.sync_proxy(collider);
            }
        }
        for collider in self.retired_proxies.drain(..) {
            self.broad_phase.remove(collider);
        }

        for handle in &destroyed {
            self.nodes.remove(*handle);
        }
        trace!("flush committed {} nodes, reclaimed {}", visited.len(), destroyed.len());
    }

    fn update_subtree_transforms(
        &mut self,
        root: NodeHandle,
        source: TransformSource,
        visited: &mut HashSet<NodeHandle>,
        mass_nodes: &mut Vec<NodeHandle>,
        moved: &mut Vec<NodeHandle>,
    ) {
        let mut subtree = Vec::new();
        collect_subtree(&self.nodes, root, &mut subtree);
        for handle in subtree {
            visited.insert(handle);
            let Some(node) = self.nodes.get(handle) else {
                continue;
            };
            if node.is_destroyed() {
                continue;
            }
            let world = parent_world(&self.nodes, node.parent()).combine(node.local_transform());
            let (body, collider) = (node.body(), node.collider());
            if let Some(node) = self.nodes.get_mut(handle) {
                node.world = world;
            }

            // The integrated node already matches its body
            let follows_body = handle == root && source == TransformSource::Integration;
            if let Some(body) = body.filter(|_| !follows_body) {
                if let Some(data) = self.bodies.get_mut(body) {
                    data.sync_from_node(&world);
                    if data.is_kinematic() {
                        self.moved_kinematics.insert(body);
                    }
                }
            }

            if let Some(data) = collider.and_then(|c| self.colliders.get_mut(c)) {
                data.update_world(&world);
                moved.push(handle);
                if source == TransformSource::External && !data.is_massless() && data.active_body().is_some() {
                    mass_nodes.push(handle);
                }
            }
        }
    }

    /// Bodies whose mass depends on the given nodes, without duplicates
    fn mass_targets(&self, nodes: &[NodeHandle]) -> Vec<BodyHandle> {
        let mut seen = HashSet::new();
        nodes
            .iter()
            .filter_map(|&handle| {
                let node = self.nodes.get(handle)?;
                node.body().or_else(|| {
                    node.collider()
                        .and_then(|c| self.colliders.get(c))
                        .and_then(Collider::active_body)
                })
            })
            .filter(|body| seen.insert(*body))
            .collect()
    }

    fn recompute_mass(&mut self, handle: BodyHandle) {
        let Some(body) = self.bodies.get(handle) else {
            return;
        };
        let mut accumulator = MassAccumulator::new();
        for (mass, center, inertia) in body
            .colliders()
            .iter()
            .filter_map(|c| self.colliders.get(*c))
            .filter_map(Collider::mass_contribution)
        {
            accumulator.add(mass, center, inertia);
        }
        let world = self.nodes.get(body.node()).map(|n| *n.world_transform()).unwrap_or_default();
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_mass_properties(accumulator.finish(), &world);
            trace!("mass of {handle:?} is now {}", body.mass());
        }
    }

    /// Insert or refresh a collider's broad phase entry in the index
    /// matching its body
    fn sync_proxy(&mut self, handle: ColliderHandle) {
        let (proxy, kind) = {
            let view = self.collision_view();
            let Some(collider) = self.colliders.get(handle) else {
                return;
            };
            let kind = if view.in_dynamic_broad_phase(collider) {
                BroadPhaseKind::Dynamic
            } else {
                BroadPhaseKind::Static
            };
            let proxy = BroadPhaseProxy { collider: handle, aabb: *collider.world_aabb(), sphere: *collider.world_sphere() };
            (proxy, kind)
        };
        if self.broad_phase.contains(handle) {
            self.broad_phase.update(proxy, kind);
        } else {
            self.broad_phase.insert(proxy, kind);
        }
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.set_flag(ColliderFlags::IN_BROAD_PHASE, true);
            collider.set_flag(ColliderFlags::IN_DYNAMIC_BROAD_PHASE, kind == BroadPhaseKind::Dynamic);
        }
    }

    /// Nearest body strictly above `node`
    pub(crate) fn nearest_body_above(&self, node: NodeHandle) -> Option<BodyHandle> {
        let mut cursor = self.nodes.get(node)?.parent();
        while let Some(current) = cursor {
            let data = self.nodes.get(current)?;
            if let Some(body) = data.body() {
                return Some(body);
            }
            cursor = data.parent();
        }
        None
    }

    /// Recompute parent bodies and collider owners below `root` after a
    /// body or collider was added or removed there
    pub(crate) fn relink_subtree(&mut self, root: NodeHandle) -> PhysicsResult<()> {
        let mut subtree = Vec::new();
        collect_subtree(&self.nodes, root, &mut subtree);
        let mut changed = Vec::new();

        for handle in subtree {
            let Some(node) = self.nodes.get(handle).filter(|n| !n.is_destroyed()) else {
                continue;
            };
            let (body, collider) = (node.body(), node.collider());
            let above = self.nearest_body_above(handle);
            if let Some(data) = body.and_then(|b| self.bodies.get_mut(b)) {
                data.parent_body = above;
            }
            let owner = body.or(above);
            if let Some(data) = collider.and_then(|c| self.colliders.get_mut(c)) {
                if data.active_body != owner {
                    changed.push((handle, data.active_body));
                    data.active_body = owner;
                }
            }
        }

        self.rebuild_body_lists();
        for (node, previous) in changed {
            self.queue_action(node, PendingAction::BroadPhase(BroadPhaseAction::Update))?;
            self.queue_action(node, PendingAction::Mass)?;
            let previous_node = previous.and_then(|b| self.bodies.get(b)).map(|b| b.node());
            if let Some(previous_node) = previous_node.filter(|n| self.nodes.get(*n).is_some_and(|d| !d.is_destroyed())) {
                self.queue_action(previous_node, PendingAction::Mass)?;
            }
        }
        Ok(())
    }

    /// Rebuild every body's collider and child body lists from the links
    /// stored on colliders and bodies
    pub(crate) fn rebuild_body_lists(&mut self) {
        let owned: Vec<(BodyHandle, ColliderHandle)> = self
            .colliders
            .iter()
            .filter_map(|(handle, c)| c.active_body.map(|b| (b, handle)))
            .collect();
        let children: Vec<(BodyHandle, BodyHandle)> = self
            .bodies
            .iter()
            .filter_map(|(handle, b)| b.parent_body.map(|parent| (parent, handle)))
            .collect();

        for body in self.bodies.values_mut() {
            body.colliders.clear();
            body.child_bodies.clear();
        }
        for (body, collider) in owned {
            if let Some(body) = self.bodies.get_mut(body) {
                body.colliders.push(collider);
            }
        }
        for (parent, child) in children {
            if let Some(parent) = self.bodies.get_mut(parent) {
                parent.child_bodies.push(child);
            }
        }
    }
}
