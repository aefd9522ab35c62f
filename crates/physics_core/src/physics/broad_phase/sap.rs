//! Sweep-and-prune index for moving colliders.
//!
//! Proxies are projected onto the axis with the largest spread of centers,
//! sorted by their minimum endpoint and swept to find overlapping intervals.
//! Rust's sort is adaptive, so the nearly sorted data of consecutive frames
//! sorts close to linear time.

use slotmap::SecondaryMap;

use super::{BroadPhaseProxy, ColliderPair};
use crate::foundation::collections::ColliderHandle;
use crate::foundation::math::{Aabb, Vec3};

/// An interval on the sweep axis
#[derive(Debug, Clone, Copy)]
struct Interval {
    collider: ColliderHandle,
    min: f32,
    max: f32,
}

/// Sweep-and-prune over a set of proxies
#[derive(Debug, Clone, Default)]
pub struct SweepAndPrune {
    proxies: SecondaryMap<ColliderHandle, BroadPhaseProxy>,
    intervals: Vec<Interval>,
    sweep_axis: usize,
    margin: f32,
}

impl SweepAndPrune {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand every proxy by `margin` when sweeping
    #[must_use]
    pub const fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    /// Add or replace a proxy
    pub fn insert(&mut self, proxy: BroadPhaseProxy) {
        self.proxies.insert(proxy.collider, proxy);
    }

    /// Remove a proxy
    pub fn remove(&mut self, collider: ColliderHandle) -> bool {
        self.proxies.remove(collider).is_some()
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

    /// Every stored proxy
    pub fn proxies(&self) -> impl Iterator<Item = &BroadPhaseProxy> {
        self.proxies.values()
    }

    /// Axis with the largest spread of proxy centers
    fn choose_sweep_axis(&self) -> usize {
        let mut min = Vec3::repeat(f32::INFINITY);
        let mut max = Vec3::repeat(f32::NEG_INFINITY);
        for proxy in self.proxies.values() {
            let center = proxy.aabb.center();
            min = min.inf(&center);
            max = max.sup(&center);
        }
        if self.proxies.is_empty() {
            return 0;
        }
        (max - min).imax()
    }

    /// Every overlapping pair of stored proxies
    pub fn self_pairs(&mut self, pairs: &mut Vec<ColliderPair>) {
        self.sweep_axis = self.choose_sweep_axis();
        let axis = self.sweep_axis;
        let margin = self.margin;

        self.intervals.clear();
        self.intervals.extend(self.proxies.values().map(|proxy| Interval {
            collider: proxy.collider,
            min: proxy.aabb.min[axis] - margin,
            max: proxy.aabb.max[axis] + margin,
        }));
        self.intervals.sort_by(|a, b| a.min.total_cmp(&b.min));

        for (i, first) in self.intervals.iter().enumerate() {
            for second in &self.intervals[i + 1..] {
                if second.min > first.max {
                    break;
                }
                let (Some(a), Some(b)) = (self.proxies.get(first.collider), self.proxies.get(second.collider)) else {
                    continue;
                };
                if a.aabb.expanded(margin).overlaps(&b.aabb.expanded(margin)) {
                    pairs.push((first.collider, second.collider));
                }
            }
        }
    }

    /// Stored proxies overlapping a box
    pub fn query_aabb(&self, aabb: &Aabb, out: &mut Vec<ColliderHandle>) {
        out.extend(
            self.proxies
                .values()
                .filter(|proxy| proxy.aabb.overlaps(aabb))
                .map(|proxy| proxy.collider),
        );
    }

    /// Stored proxies passing a predicate
    pub fn query_with(&self, mut keep: impl FnMut(&BroadPhaseProxy) -> bool, out: &mut Vec<ColliderHandle>) {
        out.extend(self.proxies.values().filter(|proxy| keep(proxy)).map(|proxy| proxy.collider));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Sphere;
    use slotmap::SlotMap;

    fn proxy(collider: ColliderHandle, center: Vec3) -> BroadPhaseProxy {
        let aabb = Aabb::from_center_half_extents(center, Vec3::repeat(1.0));
        BroadPhaseProxy { collider, aabb, sphere: Sphere::from_aabb(&aabb) }
    }

    #[test]
    fn test_overlapping_pairs_found() {
        let mut handles: SlotMap<ColliderHandle, ()> = SlotMap::with_key();
        let a = handles.insert(());
        let b = handles.insert(());
        let c = handles.insert(());

        let mut sap = SweepAndPrune::new();
        sap.insert(proxy(a, Vec3::zeros()));
        sap.insert(proxy(b, Vec3::new(1.5, 0.0, 0.0)));
        sap.insert(proxy(c, Vec3::new(10.0, 0.0, 0.0)));

        let mut pairs = Vec::new();
        sap.self_pairs(&mut pairs);
        assert_eq!(pairs.len(), 1);
        let (x, y) = pairs[0];
        assert!((x == a && y == b) || (x == b && y == a));
    }

    #[test]
    fn test_axis_overlap_needs_full_overlap() {
        let mut handles: SlotMap<ColliderHandle, ()> = SlotMap::with_key();
        let a = handles.insert(());
        let b = handles.insert(());

        let mut sap = SweepAndPrune::new();
        sap.insert(proxy(a, Vec3::zeros()));
        sap.insert(proxy(b, Vec3::new(0.5, 5.0, 0.0)));

        let mut pairs = Vec::new();
        sap.self_pairs(&mut pairs);
        assert!(pairs.is_empty());

        assert!(sap.remove(a));
        assert!(!sap.remove(a));
        assert_eq!(sap.len(), 1);
    }
}
