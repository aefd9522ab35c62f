//! # Broad Phase
//!
//! Coarse culling of collider pairs by bounding volume. The space talks to
//! the broad phase only through the [`BroadPhase`] trait; the default
//! [`BroadPhasePackage`] keeps moving colliders in a sweep-and-prune index
//! and static ones in a loose octree.

mod octree;
mod sap;

pub use octree::{LooseOctree, OctreeConfig};
pub use sap::SweepAndPrune;

use std::collections::HashSet;

use log::trace;

use crate::foundation::collections::ColliderHandle;
use crate::foundation::math::{Aabb, Frustum, Ray, Segment, Sphere};

/// A candidate pair of colliders
pub type ColliderPair = (ColliderHandle, ColliderHandle);

/// What the broad phase stores per collider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BroadPhaseProxy {
    /// The collider
    pub collider: ColliderHandle,
    /// World bounds
    pub aabb: Aabb,
    /// World bounding sphere
    pub sphere: Sphere,
}

/// Which index a proxy lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadPhaseKind {
    /// Colliders with a non-static body
    Dynamic,
    /// Everything else
    Static,
}

/// Counters of the last recorded frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadPhaseStatistics {
    /// Pairs reported by the last query
    pub candidate_pairs: usize,
    /// Pairs that reached the narrow phase
    pub tracked_pairs: usize,
    /// Tracked pairs that were also tracked the frame before
    pub persistent_pairs: usize,
    /// Frames recorded
    pub frames: u64,
}

/// Spatial index consumed by the space
pub trait BroadPhase {
    /// Add a collider
    fn insert(&mut self, proxy: BroadPhaseProxy, kind: BroadPhaseKind);

    /// Refresh a collider's bounds, moving it between indexes if needed
    fn update(&mut self, proxy: BroadPhaseProxy, kind: BroadPhaseKind);

    /// Take a collider out; returns whether it was stored
    fn remove(&mut self, collider: ColliderHandle) -> bool;

    /// Whether the collider is stored
    fn contains(&self, collider: ColliderHandle) -> bool;

    /// Index a stored collider lives in
    fn kind_of(&self, collider: ColliderHandle) -> Option<BroadPhaseKind>;

    /// Dynamic against dynamic, then static against every dynamic proxy
    fn self_query(&mut self, pairs: &mut Vec<ColliderPair>);

    /// Pairs of each given proxy against everything stored
    fn batch_query(&self, proxies: &[BroadPhaseProxy], pairs: &mut Vec<ColliderPair>);

    /// Pairs of one proxy against both indexes
    fn query_both(&self, proxy: &BroadPhaseProxy, pairs: &mut Vec<ColliderPair>);

    /// Colliders whose bounds a ray enters within `max_distance`
    fn cast_ray(&self, ray: &Ray, max_distance: f32, out: &mut Vec<ColliderHandle>);

    /// Colliders whose bounds a segment touches
    fn cast_segment(&self, segment: &Segment, out: &mut Vec<ColliderHandle>);

    /// Colliders whose bounds overlap a box
    fn cast_aabb(&self, aabb: &Aabb, out: &mut Vec<ColliderHandle>);

    /// Colliders whose bounds overlap a sphere
    fn cast_sphere(&self, sphere: &Sphere, out: &mut Vec<ColliderHandle>);

    /// Colliders whose bounds overlap a frustum
    fn cast_frustum(&self, frustum: &Frustum, out: &mut Vec<ColliderHandle>);

    /// Start collecting this frame's narrow phase pairs
    fn register_collisions(&mut self);

    /// Pairs the narrow phase actually tested this frame
    fn record_frame_results(&mut self, pairs: &[ColliderPair]);

    /// Counters of the last recorded frame
    fn statistics(&self) -> BroadPhaseStatistics;
}

/// Sweep-and-prune for dynamic proxies plus a loose octree for static ones
#[derive(Debug, Default)]
pub struct BroadPhasePackage {
    dynamic: SweepAndPrune,
    statics: LooseOctree,
    previous_pairs: HashSet<ColliderPair>,
    statistics: BroadPhaseStatistics,
}

impl BroadPhasePackage {
    /// Empty package with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Package with a custom static tree
    pub fn with_octree(config: OctreeConfig) -> Self {
        Self { statics: LooseOctree::new(config), ..Self::default() }
    }

    /// Number of dynamic proxies
    pub fn dynamic_count(&self) -> usize {
        self.dynamic.len()
    }

    /// Number of static proxies
    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    fn query_into(&self, filter: impl Fn(&Aabb) -> bool + Copy, out: &mut Vec<ColliderHandle>) {
        self.dynamic.query_with(|proxy| filter(&proxy.aabb), out);
        self.statics.query_with(filter, out);
    }
}

fn ordered(pair: ColliderPair) -> ColliderPair {
    if pair.0 <= pair.1 { pair } else { (pair.1, pair.0) }
}

impl BroadPhase for BroadPhasePackage {
    fn insert(&mut self, proxy: BroadPhaseProxy, kind: BroadPhaseKind) {
        self.remove(proxy.collider);
        match kind {
            BroadPhaseKind::Dynamic => self.dynamic.insert(proxy),
            BroadPhaseKind::Static => self.statics.insert(proxy),
        }
    }

    fn update(&mut self, proxy: BroadPhaseProxy, kind: BroadPhaseKind) {
        self.insert(proxy, kind);
    }

    fn remove(&mut self, collider: ColliderHandle) -> bool {
        self.dynamic.remove(collider) | self.statics.remove(collider)
    }

    fn contains(&self, collider: ColliderHandle) -> bool {
        self.dynamic.contains(collider) || self.statics.contains(collider)
    }

    fn kind_of(&self, collider: ColliderHandle) -> Option<BroadPhaseKind> {
        if self.dynamic.contains(collider) {
            Some(BroadPhaseKind::Dynamic)
        } else if self.statics.contains(collider) {
            Some(BroadPhaseKind::Static)
        } else {
            None
        }
    }

    fn self_query(&mut self, pairs: &mut Vec<ColliderPair>) {
        let start = pairs.len();
        self.dynamic.self_pairs(pairs);
        let mut hits = Vec::new();
        for proxy in self.dynamic.proxies() {
            hits.clear();
            self.statics.query_aabb(&proxy.aabb, &mut hits);
            pairs.extend(hits.iter().map(|other| (proxy.collider, *other)));
        }
        self.statistics.candidate_pairs = pairs.len() - start;
        trace!("broad phase produced {} candidate pairs", self.statistics.candidate_pairs);
    }

    fn batch_query(&self, proxies: &[BroadPhaseProxy], pairs: &mut Vec<ColliderPair>) {
        for proxy in proxies {
            self.query_both(proxy, pairs);
        }
    }

    fn query_both(&self, proxy: &BroadPhaseProxy, pairs: &mut Vec<ColliderPair>) {
        let mut hits = Vec::new();
        self.query_into(|aabb| aabb.overlaps(&proxy.aabb), &mut hits);
        pairs.extend(
            hits.into_iter()
                .filter(|other| *other != proxy.collider)
                .map(|other| (proxy.collider, other)),
        );
    }

    fn cast_ray(&self, ray: &Ray, max_distance: f32, out: &mut Vec<ColliderHandle>) {
        self.query_into(
            |aabb| aabb.intersect_ray(&ray.origin, &ray.direction).is_some_and(|t| t <= max_distance),
            out,
        );
    }

    fn cast_segment(&self, segment: &Segment, out: &mut Vec<ColliderHandle>) {
        let ray = Ray::new(segment.start, segment.end - segment.start);
        self.cast_ray(&ray, segment.length(), out);
    }

    fn cast_aabb(&self, aabb: &Aabb, out: &mut Vec<ColliderHandle>) {
        self.query_into(|other| other.overlaps(aabb), out);
    }

    fn cast_sphere(&self, sphere: &Sphere, out: &mut Vec<ColliderHandle>) {
        self.query_into(|aabb| sphere.overlaps_aabb(aabb), out);
    }

    fn cast_frustum(&self, frustum: &Frustum, out: &mut Vec<ColliderHandle>) {
        self.query_into(|aabb| frustum.overlaps_aabb(aabb), out);
    }

    fn register_collisions(&mut self) {
        self.statistics.tracked_pairs = 0;
    }

    fn record_frame_results(&mut self, pairs: &[ColliderPair]) {
        let current: HashSet<ColliderPair> = pairs.iter().copied().map(ordered).collect();
        self.statistics.tracked_pairs = current.len();
        self.statistics.persistent_pairs = current.intersection(&self.previous_pairs).count();
        self.statistics.frames += 1;
        self.previous_pairs = current;
    }

    fn statistics(&self) -> BroadPhaseStatistics {
        self.statistics
    }
}
