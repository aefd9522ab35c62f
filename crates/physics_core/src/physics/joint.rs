//! Joints
//!
//! The core only tracks which colliders a joint connects and whether the
//! connected colliders may still collide. Joint numerics belong to the
//! solver; the default solver uses joints for islanding only.

use crate::foundation::collections::{ColliderHandle, JointHandle};

/// A joint between two colliders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joint {
    colliders: [ColliderHandle; 2],
    collide_connected: bool,
    valid: bool,
}

impl Joint {
    pub(crate) const fn new(a: ColliderHandle, b: ColliderHandle, collide_connected: bool) -> Self {
        Self { colliders: [a, b], collide_connected, valid: true }
    }

    /// The two connected colliders
    pub const fn colliders(&self) -> [ColliderHandle; 2] {
        self.colliders
    }

    /// Whether the connected colliders are still tested against each other
    pub const fn collide_connected(&self) -> bool {
        self.collide_connected
    }

    /// False once either collider has been destroyed
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_collide_connected(&mut self, collide_connected: bool) {
        self.collide_connected = collide_connected;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// The collider on the other end from `collider`
    pub fn other(&self, collider: ColliderHandle) -> Option<ColliderHandle> {
        match self.colliders {
            [a, b] if a == collider => Some(b),
            [a, b] if b == collider => Some(a),
            _ => None,
        }
    }
}

/// One end of a joint as seen from a collider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointEdge {
    /// The joint
    pub joint: JointHandle,
    /// The collider on the other end
    pub other: ColliderHandle,
    /// Cached copy of the joint's flag, used for sorting
    pub collide_connected: bool,
}

/// Insert `edge` keeping edges that forbid collision in front
pub fn insert_joint_edge(edges: &mut Vec<JointEdge>, edge: JointEdge) {
    let index = if edge.collide_connected {
        edges.len()
    } else {
        edges.iter().position(|e| e.collide_connected).unwrap_or(edges.len())
    };
    edges.insert(index, edge);
}

/// Remove the edge for `joint`, returning it
pub fn remove_joint_edge(edges: &mut Vec<JointEdge>, joint: JointHandle) -> Option<JointEdge> {
    let index = edges.iter().position(|e| e.joint == joint)?;
    Some(edges.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_edges_stay_sorted() {
        let mut colliders: SlotMap<ColliderHandle, ()> = SlotMap::with_key();
        let mut joints: SlotMap<JointHandle, ()> = SlotMap::with_key();
        let other = colliders.insert(());

        let mut edges = Vec::new();
        let j0 = joints.insert(());
        let j1 = joints.insert(());
        let j2 = joints.insert(());
        insert_joint_edge(&mut edges, JointEdge { joint: j0, other, collide_connected: true });
        insert_joint_edge(&mut edges, JointEdge { joint: j1, other, collide_connected: false });
        insert_joint_edge(&mut edges, JointEdge { joint: j2, other, collide_connected: true });

        let flags: Vec<bool> = edges.iter().map(|e| e.collide_connected).collect();
        assert_eq!(flags, vec![false, true, true]);
        assert_eq!(edges[0].joint, j1);

        assert!(remove_joint_edge(&mut edges, j1).is_some());
        assert!(remove_joint_edge(&mut edges, j1).is_none());
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn test_joint_other_end() {
        let mut colliders: SlotMap<ColliderHandle, ()> = SlotMap::with_key();
        let a = colliders.insert(());
        let b = colliders.insert(());
        let c = colliders.insert(());
        let joint = Joint::new(a, b, false);
        assert_eq!(joint.other(a), Some(b));
        assert_eq!(joint.other(b), Some(a));
        assert_eq!(joint.other(c), None);
    }
}
