//! Loose octree for static colliders
//!
//! Divides space into hierarchical regions for fast spatial queries. Each
//! node subdivides into 8 octants when its entry count exceeds a threshold.
//! Node bounds are loosened by a factor of two so that an entry always fits
//! entirely inside the node it is stored in. Entries outside the root go to
//! an overflow list that every query also scans.

use slotmap::SecondaryMap;

use super::BroadPhaseProxy;
use crate::foundation::collections::ColliderHandle;
use crate::foundation::math::{Aabb, Vec3};

/// Configuration for octree behavior
#[derive(Debug, Clone)]
pub struct OctreeConfig {
    /// Maximum entries per node before subdivision
    pub max_entries_per_node: usize,
    /// Maximum subdivision depth
    pub max_depth: u32,
    /// Minimum node size (prevents excessive subdivision)
    pub min_node_size: f32,
    /// Half size of the root cell
    pub world_half_extent: f32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_entries_per_node: 8,
            max_depth: 8,
            min_node_size: 1.0,
            world_half_extent: 1024.0,
        }
    }
}

/// Single node in the octree hierarchy
#[derive(Debug, Clone)]
struct OctreeNode {
    /// Tight cell bounds
    bounds: Aabb,
    /// Cell bounds grown so entries may poke out of the cell
    loose: Aabb,
    entries: Vec<(ColliderHandle, Aabb)>,
    children: Option<Box<[OctreeNode; 8]>>,
    depth: u32,
}

impl OctreeNode {
    fn new(bounds: Aabb, depth: u32) -> Self {
        let loose = Aabb::from_center_half_extents(bounds.center(), bounds.half_extents() * 2.0);
        Self { bounds, loose, entries: Vec::new(), children: None, depth }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Octant holding a point, bit layout x | y << 1 | z << 2
    fn octant_index(&self, position: &Vec3) -> usize {
        let center = self.bounds.center();
        let x_bit = usize::from(position.x >= center.x);
        let y_bit = usize::from(position.y >= center.y);
        let z_bit = usize::from(position.z >= center.z);
        (z_bit << 2) | (y_bit << 1) | x_bit
    }

    fn subdivide(&mut self) {
        if self.children.is_some() {
            return;
        }
        let center = self.bounds.center();
        let quarter = self.bounds.half_extents() * 0.5;
        let depth = self.depth + 1;
        let child = |octant: usize| {
            let sign = |bit: usize| if octant & bit != 0 { 1.0 } else { -1.0 };
            let child_center = center + Vec3::new(quarter.x * sign(1), quarter.y * sign(2), quarter.z * sign(4));
            OctreeNode::new(Aabb::from_center_half_extents(child_center, quarter), depth)
        };
        self.children = Some(Box::new([child(0), child(1), child(2), child(3), child(4), child(5), child(6), child(7)]));
    }

    /// Child that can hold the box, if it fits inside that child's loose bounds
    fn child_for(&mut self, aabb: &Aabb) -> Option<&mut OctreeNode> {
        let octant = self.octant_index(&aabb.center());
        let children = self.children.as_mut()?;
        let child = &mut children[octant];
        child.loose.contains(aabb).then_some(child)
    }

    fn insert(&mut self, collider: ColliderHandle, aabb: Aabb, config: &OctreeConfig) {
        if self.is_leaf() {
            let should_subdivide = self.entries.len() >= config.max_entries_per_node
                && self.depth < config.max_depth
                && self.bounds.half_extents().x > config.min_node_size;
            if !should_subdivide {
                self.entries.push((collider, aabb));
                return;
            }
            self.subdivide();
            // Push existing entries down where they fit
            for (handle, entry) in std::mem::take(&mut self.entries) {
                match self.child_for(&entry) {
                    Some(child) => child.entries.push((handle, entry)),
                    None => self.entries.push((handle, entry)),
                }
            }
        }
        match self.child_for(&aabb) {
            Some(child) => child.insert(collider, aabb, config),
            None => self.entries.push((collider, aabb)),
        }
    }

    fn remove(&mut self, collider: ColliderHandle, aabb: &Aabb) -> bool {
        if let Some(index) = self.entries.iter().position(|(handle, _)| *handle == collider) {
            self.entries.swap_remove(index);
            return true;
        }
        let octant = self.octant_index(&aabb.center());
        if let Some(children) = self.children.as_mut() {
            if children[octant].remove(collider, aabb) {
                return true;
            }
            return children.iter_mut().any(|child| child.remove(collider, aabb));
        }
        false
    }

    fn query(&self, overlaps: &mut impl FnMut(&Aabb) -> bool, out: &mut Vec<ColliderHandle>) {
        if !overlaps(&self.loose) {
            return;
        }
        out.extend(self.entries.iter().filter(|(_, aabb)| overlaps(aabb)).map(|(handle, _)| *handle));
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.query(overlaps, out);
            }
        }
    }

    fn count_entries(&self) -> usize {
        self.entries.len() + self.children.as_ref().map_or(0, |c| c.iter().map(Self::count_entries).sum())
    }
}

/// Loose octree of static proxies
#[derive(Debug, Clone)]
pub struct LooseOctree {
    root: OctreeNode,
    overflow: Vec<(ColliderHandle, Aabb)>,
    proxies: SecondaryMap<ColliderHandle, BroadPhaseProxy>,
    config: OctreeConfig,
}

impl Default for LooseOctree {
    fn default() -> Self {
        Self::new(OctreeConfig::default())
    }
}

impl LooseOctree {
    /// Create an empty tree
    pub fn new(config: OctreeConfig) -> Self {
        let bounds = Aabb::from_center_half_extents(Vec3::zeros(), Vec3::repeat(config.world_half_extent));
        Self {
            root: OctreeNode::new(bounds, 0),
            overflow: Vec::new(),
            proxies: SecondaryMap::new(),
            config,
        }
    }

    /// Add or replace a proxy
    pub fn insert(&mut self, proxy: BroadPhaseProxy) {
        self.remove(proxy.collider);
        if self.root.bounds.contains(&proxy.aabb) {
            self.root.insert(proxy.collider, proxy.aabb, &self.config);
        } else {
            self.overflow.push((proxy.collider, proxy.aabb));
        }
        self.proxies.insert(proxy.collider, proxy);
    }

    /// Remove a proxy
    pub fn remove(&mut self, collider: ColliderHandle) -> bool {
        let Some(proxy) = self.proxies.remove(collider) else {
            return false;
        };
        if let Some(index) = self.overflow.iter().position(|(handle, _)| *handle == collider) {
            self.overflow.swap_remove(index);
            return true;
        }
        self.root.remove(collider, &proxy.aabb)
    }

    /// Whether a collider is stored
    pub fn contains(&self, collider: ColliderHandle) -> bool {
        self.proxies.contains_key(collider)
    }

    /// Stored proxy of a collider
    pub fn get(&self, collider: ColliderHandle) -> Option<&BroadPhaseProxy> {
        self.proxies.get(collider)
    }

    /// Number of proxies
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// No proxies
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Entries stored in the tree itself
    pub fn tree_entry_count(&self) -> usize {
        self.root.count_entries()
    }

    /// Colliders whose box passes `overlaps`; nodes are pruned with the
    /// same test on their loose bounds
    pub fn query_with(&self, mut overlaps: impl FnMut(&Aabb) -> bool, out: &mut Vec<ColliderHandle>) {
        self.root.query(&mut overlaps, out);
        out.extend(self.overflow.iter().filter(|(_, aabb)| overlaps(aabb)).map(|(handle, _)| *handle));
    }

    /// Colliders overlapping a box
    pub fn query_aabb(&self, aabb: &Aabb, out: &mut Vec<ColliderHandle>) {
        self.query_with(|other| other.overlaps(aabb), out);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.root = OctreeNode::new(self.root.bounds, 0);
        self.overflow.clear();
        self.proxies.clear();
    }
}
