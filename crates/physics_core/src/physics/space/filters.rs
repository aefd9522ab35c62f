//! Explicit "do not collide" pairs between owners

use std::collections::HashSet;

use log::debug;

use super::PhysicsSpace;
use crate::error::PhysicsResult;
use crate::foundation::collections::{lexicographic_id, unpack_lexicographic_id, NodeHandle};
use crate::physics::collider::ColliderFlags;
use crate::physics::node::collect_subtree;

impl PhysicsSpace {
    /// Stop the colliders of two nodes from ever being tested together
    pub fn add_pair_filter(&mut self, a: NodeHandle, b: NodeHandle) -> PhysicsResult<()> {
        let key = lexicographic_id(self.live_node(a)?.owner_id(), self.live_node(b)?.owner_id());
        self.filtered_pairs.insert(key);
        self.refresh_pair_filter_flags();
        Ok(())
    }

    /// Let two nodes collide again
    pub fn remove_pair_filter(&mut self, a: NodeHandle, b: NodeHandle) -> PhysicsResult<()> {
        let key = lexicographic_id(self.live_node(a)?.owner_id(), self.live_node(b)?.owner_id());
        self.filtered_pairs.remove(&key);
        self.refresh_pair_filter_flags();
        Ok(())
    }

    /// Filter every pair of nodes taken one from each subtree
    pub fn add_hierarchy_pair_filter(&mut self, a: NodeHandle, b: NodeHandle) -> PhysicsResult<()> {
        let keys = self.hierarchy_pair_keys(a, b)?;
        debug!("filtering {} hierarchy pairs", keys.len());
        self.filtered_pairs.extend(keys);
        self.refresh_pair_filter_flags();
        Ok(())
    }

    /// Undo [`Self::add_hierarchy_pair_filter`]
    pub fn remove_hierarchy_pair_filter(&mut self, a: NodeHandle, b: NodeHandle) -> PhysicsResult<()> {
        for key in self.hierarchy_pair_keys(a, b)? {
            self.filtered_pairs.remove(&key);
        }
        self.refresh_pair_filter_flags();
        Ok(())
    }

    /// Packed owner id pairs currently filtered
    pub const fn filtered_pairs(&self) -> &HashSet<u64> {
        &self.filtered_pairs
    }

    /// Drop every filter naming `owner`
    pub(crate) fn erase_pair_filters(&mut self, owner: u32) {
        let before = self.filtered_pairs.len();
        self.filtered_pairs.retain(|&key| {
            let (low, high) = unpack_lexicographic_id(key);
            low != owner && high != owner
        });
        if self.filtered_pairs.len() != before {
            debug!("erased {} pair filters of owner {owner}", before - self.filtered_pairs.len());
            self.refresh_pair_filter_flags();
        }
    }

    fn hierarchy_pair_keys(&self, a: NodeHandle, b: NodeHandle) -> PhysicsResult<Vec<u64>> {
        self.live_node(a)?;
        self.live_node(b)?;
        let (mut left, mut right) = (Vec::new(), Vec::new());
        collect_subtree(&self.nodes, a, &mut left);
        collect_subtree(&self.nodes, b, &mut right);
        let owners = |nodes: &[NodeHandle]| -> Vec<u32> {
            nodes.iter().filter_map(|n| self.nodes.get(*n)).map(|n| n.owner_id()).collect()
        };
        let (left, right) = (owners(&left), owners(&right));
        Ok(left
            .iter()
            .flat_map(|&x| right.iter().map(move |&y| lexicographic_id(x, y)))
            .collect())
    }

    /// Flag exactly the colliders whose owner appears in some filter
    fn refresh_pair_filter_flags(&mut self) {
        let owners: HashSet<u32> = self
            .filtered_pairs
            .iter()
            .flat_map(|&key| {
                let (low, high) = unpack_lexicographic_id(key);
                [low, high]
            })
            .collect();
        for collider in self.colliders.values_mut() {
            let filtered = self.nodes.get(collider.node()).is_some_and(|n| owners.contains(&n.owner_id()));
            collider.set_flag(ColliderFlags::HAS_PAIR_FILTER, filtered);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::foundation::math::Transform;
    use crate::physics::collider::ColliderDesc;
    use crate::physics::shape::Shape;
    use crate::physics::PhysicsSpace;

    #[test]
    fn test_pair_filter_flags_both_colliders() {
        let mut space = PhysicsSpace::default();
        let a = space.create_node(None, Transform::identity()).unwrap();
        let b = space.create_node(None, Transform::identity()).unwrap();
        let collider_a = space.add_collider(a, ColliderDesc::new(Shape::sphere(1.0))).unwrap();
        let collider_b = space.add_collider(b, ColliderDesc::new(Shape::sphere(1.0))).unwrap();

        assert!(space.add_pair_filter(a, b).is_ok());
        assert_eq!(space.filtered_pairs().len(), 1);
        assert!(space.collider(collider_a).is_some_and(|c| c.has_pair_filter()));
        assert!(space.collider(collider_b).is_some_and(|c| c.has_pair_filter()));

        assert!(space.remove_pair_filter(b, a).is_ok());
        assert!(space.filtered_pairs().is_empty());
        assert!(space.collider(collider_a).is_some_and(|c| !c.has_pair_filter()));
    }

    #[test]
    fn test_hierarchy_filter_covers_every_descendant() {
        let mut space = PhysicsSpace::default();
        let left = space.create_node(None, Transform::identity()).unwrap();
        let right = space.create_node(None, Transform::identity()).unwrap();
        for parent in [left, right] {
            assert!(space.create_node(Some(parent), Transform::identity()).is_ok());
        }

        assert!(space.add_hierarchy_pair_filter(left, right).is_ok());
        assert_eq!(space.filtered_pairs().len(), 4);
        assert!(space.remove_hierarchy_pair_filter(left, right).is_ok());
        assert!(space.filtered_pairs().is_empty());
    }

    #[test]
    fn test_destroying_an_owner_erases_its_filters() {
        let mut space = PhysicsSpace::default();
        let a = space.create_node(None, Transform::identity()).unwrap();
        let b = space.create_node(None, Transform::identity()).unwrap();
        let c = space.create_node(None, Transform::identity()).unwrap();
        assert!(space.add_pair_filter(a, b).is_ok());
        assert!(space.add_pair_filter(b, c).is_ok());

        assert!(space.destroy_node(a).is_ok());
        assert_eq!(space.filtered_pairs().len(), 1);
    }
}


