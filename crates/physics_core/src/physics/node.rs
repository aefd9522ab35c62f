//! # Physics Nodes
//!
//! One node per object in the physics hierarchy. A node caches its world
//! transform and collects pending actions; the owning space commits them in
//! batches at its flush points.
//!
//! A node's cached world transform is valid only while neither it nor any
//! ancestor has a pending transform action.

use crate::error::{PhysicsError, PhysicsResult};
use crate::foundation::collections::{BodyHandle, ColliderHandle, HandleMap, NodeHandle};
use crate::foundation::math::Transform;
use log::error;

/// Who moved a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformSource {
    /// Game code wrote a new local transform; bodies re-sync from the node
    External,
    /// The integrator moved the body; the node follows the body
    Integration,
}

/// What to do with a node's collider in the broad phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadPhaseAction {
    /// Add the collider
    Insert,
    /// Refresh the collider's bounds
    Update,
    /// Take the collider out
    Remove,
}

/// A deferred change to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingAction {
    /// Recompute the world transform of the node and its subtree
    Transform(TransformSource),
    /// Recompute the mass of the owning body
    Mass,
    /// Change broad phase membership
    BroadPhase(BroadPhaseAction),
}

/// Coalesced actions queued on one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingActions {
    /// Pending transform update, external writes win over integration
    pub transform: Option<TransformSource>,
    /// Pending mass update
    pub mass: bool,
    /// Pending broad phase change, the latest insert or remove wins
    pub broad_phase: Option<BroadPhaseAction>,
}

impl PendingActions {
    /// Merge an action in
    pub fn push(&mut self, action: PendingAction) {
        match action {
            PendingAction::Transform(source) => {
                self.transform = match (self.transform, source) {
                    (Some(TransformSource::External), _) => Some(TransformSource::External),
                    (_, source) => Some(source),
                };
            }
            PendingAction::Mass => self.mass = true,
            PendingAction::BroadPhase(action) => {
                self.broad_phase = match (self.broad_phase, action) {
                    (Some(current @ (BroadPhaseAction::Insert | BroadPhaseAction::Remove)), BroadPhaseAction::Update) => {
                        Some(current)
                    }
                    (_, action) => Some(action),
                };
            }
        }
    }

    /// Nothing queued
    pub const fn is_empty(&self) -> bool {
        self.transform.is_none() && !self.mass && self.broad_phase.is_none()
    }
}

/// A node in the physics hierarchy
#[derive(Debug, Clone)]
pub struct PhysicsNode {
    pub(crate) owner_id: u32,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) collider: Option<ColliderHandle>,
    pub(crate) body: Option<BodyHandle>,
    pub(crate) local: Transform,
    pub(crate) world: Transform,
    pub(crate) pending: PendingActions,
    pub(crate) depth: u32,
    queued: bool,
    destroyed: bool,
}

impl PhysicsNode {
    pub(crate) fn new(owner_id: u32, parent: Option<NodeHandle>, local: Transform, depth: u32) -> Self {
        Self {
            owner_id,
            parent,
            children: Vec::new(),
            collider: None,
            body: None,
            local,
            world: local,
            pending: PendingActions::default(),
            depth,
            queued: false,
            destroyed: false,
        }
    }

    /// Id of the owning object, used by pair filters
    pub const fn owner_id(&self) -> u32 {
        self.owner_id
    }

    /// Parent node
    pub const fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// Child nodes
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// Collider attached to this node
    pub const fn collider(&self) -> Option<ColliderHandle> {
        self.collider
    }

    /// Body attached to this node
    pub const fn body(&self) -> Option<BodyHandle> {
        self.body
    }

    /// Transform relative to the parent node
    pub const fn local_transform(&self) -> &Transform {
        &self.local
    }

    /// Cached world transform. Only valid after a flush.
    pub const fn world_transform(&self) -> &Transform {
        &self.world
    }

    /// Distance from the root
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Actions waiting for the next flush
    pub const fn pending(&self) -> &PendingActions {
        &self.pending
    }

    /// Whether the node sits in its space's queue
    pub const fn is_queued(&self) -> bool {
        self.queued
    }

    /// Whether the node was torn down
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
        self.collider = None;
        self.body = None;
    }

    pub(crate) fn take_pending(&mut self) -> PendingActions {
        self.queued = false;
        std::mem::take(&mut self.pending)
    }
}

/// The space-wide list of nodes with pending actions
#[derive(Debug, Default)]
pub struct NodeQueue {
    nodes: Vec<NodeHandle>,
}

impl NodeQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `action` on `handle`, registering the node if it was idle.
    ///
    /// Mutating a destroyed node is a programmer error: it trips a debug
    /// assertion and returns [`PhysicsError::DestroyedOwner`].
    pub fn push(
        &mut self,
        nodes: &mut HandleMap<NodeHandle, PhysicsNode>,
        handle: NodeHandle,
        action: PendingAction,
    ) -> PhysicsResult<()> {
        let Some(node) = nodes.get_mut(handle) else {
            return Err(PhysicsError::InvalidHandle("node"));
        };
        if node.destroyed {
            let message = format!("{action:?} queued on node of owner {}", node.owner_id);
            error!("Object mutated after destruction: {message}");
            debug_assert!(false, "Object mutated after destruction: {message}");
            return Err(PhysicsError::DestroyedOwner(message));
        }
        node.pending.push(action);
        if !node.queued {
            node.queued = true;
            self.nodes.push(handle);
        }
        Ok(())
    }

    /// Whether anything is waiting
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of queued nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Take the queued nodes sorted parents first
    pub fn take_sorted(&mut self, nodes: &HandleMap<NodeHandle, PhysicsNode>) -> Vec<NodeHandle> {
        let mut queued = std::mem::take(&mut self.nodes);
        queued.sort_by_key(|handle| nodes.get(*handle).map_or(u32::MAX, |node| node.depth));
        queued
    }
}

/// Every node in the subtree rooted at `root`, parents before children
pub fn collect_subtree(nodes: &HandleMap<NodeHandle, PhysicsNode>, root: NodeHandle, out: &mut Vec<NodeHandle>) {
    let start = out.len();
    if nodes.contains_key(root) {
        out.push(root);
    }
    let mut cursor = start;
    while cursor < out.len() {
        if let Some(node) = nodes.get(out[cursor]) {
            out.extend(node.children.iter().copied());
        }
        cursor += 1;
    }
}

/// World transform of `parent`, or identity for roots
pub fn parent_world(nodes: &HandleMap<NodeHandle, PhysicsNode>, parent: Option<NodeHandle>) -> Transform {
    parent
        .and_then(|p| nodes.get(p))
        .map_or_else(Transform::identity, |node| node.world)
}
