//! # Casts
//!
//! Result and filter types for ray, volume and sweep queries, plus the
//! exact shape tests those queries run after the broad phase.

use bitflags::bitflags;

use super::collider::Collider;
use super::collision_group::CollisionGroupId;
use super::gjk::{gjk, GjkResult};
use super::shape::{PointSupport, Support, WorldConvex};
use crate::foundation::collections::ColliderHandle;
use crate::foundation::math::{Aabb, Ray, Vec3};

/// Distance at which a ray counts as touching a surface
const RAY_TOLERANCE: f32 = 1.0e-3;
const MAX_RAY_STEPS: usize = 64;

bitflags! {
    /// Which colliders a cast skips
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CastFilterFlags: u32 {
        /// Colliders without a dynamic or kinematic body
        const IGNORE_STATIC = 1 << 0;
        /// Colliders on dynamic bodies
        const IGNORE_DYNAMIC = 1 << 1;
        /// Colliders on kinematic bodies
        const IGNORE_KINEMATIC = 1 << 2;
        /// Ghost colliders
        const IGNORE_GHOST = 1 << 3;
    }
}

/// Limits for a cast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastFilter {
    /// Most results returned, closest first
    pub max_results: usize,
    /// Skip flags
    pub flags: CastFilterFlags,
    /// One collider to skip, typically the caster's own
    pub ignore_collider: Option<ColliderHandle>,
    /// Groups to skip
    pub ignore_groups: Vec<CollisionGroupId>,
}

impl Default for CastFilter {
    fn default() -> Self {
        Self {
            max_results: usize::MAX,
            flags: CastFilterFlags::empty(),
            ignore_collider: None,
            ignore_groups: Vec::new(),
        }
    }
}

impl CastFilter {
    /// Filter that keeps everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the result count
    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Add skip flags
    #[must_use]
    pub fn with_flags(mut self, flags: CastFilterFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Skip one collider
    #[must_use]
    pub fn ignoring(mut self, collider: ColliderHandle) -> Self {
        self.ignore_collider = Some(collider);
        self
    }

    /// Skip a collision group
    #[must_use]
    pub fn ignoring_group(mut self, group: CollisionGroupId) -> Self {
        self.ignore_groups.push(group);
        self
    }

    /// Whether a collider passes. `is_dynamic` and `is_kinematic` come from
    /// the collider's resolved body.
    pub fn accepts(&self, handle: ColliderHandle, collider: &Collider, is_dynamic: bool, is_kinematic: bool) -> bool {
        if self.ignore_collider == Some(handle) {
            return false;
        }
        if self.flags.contains(CastFilterFlags::IGNORE_GHOST) && collider.is_ghost() {
            return false;
        }
        let is_static = !is_dynamic && !is_kinematic;
        if (is_static && self.flags.contains(CastFilterFlags::IGNORE_STATIC))
            || (is_dynamic && self.flags.contains(CastFilterFlags::IGNORE_DYNAMIC))
            || (is_kinematic && self.flags.contains(CastFilterFlags::IGNORE_KINEMATIC))
        {
            return false;
        }
        !self.ignore_groups.contains(&collider.group().id())
    }
}

/// One collider hit by a cast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CastResult {
    /// The collider
    pub collider: ColliderHandle,
    /// Distance along the ray, zero for volume casts
    pub time: f32,
    /// First point hit
    pub world_point: Vec3,
    /// Surface normal at the hit, facing the caster
    pub normal: Vec3,
}

/// One collider hit by a sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepResult {
    /// The collider hit
    pub other: ColliderHandle,
    /// Time of first contact
    pub time: f32,
    /// Overlap at that time, negative while still apart
    pub penetration: f32,
    /// Contact point on the other collider
    pub world_point: Vec3,
    /// Normal pointing from the other collider towards the swept one
    pub normal: Vec3,
}

/// Sort by time and keep the first `max_results`
pub fn finish_results<T>(results: &mut Vec<T>, max_results: usize, time: impl Fn(&T) -> f32) {
    results.sort_by(|a, b| time(a).total_cmp(&time(b)));
    results.truncate(max_results);
}

/// Conservative advancement of a ray point against a convex shape.
/// Returns the distance and the surface normal facing the ray.
pub fn ray_cast_convex<S: Support + ?Sized>(shape: &S, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3)> {
    let mut t = 0.0;
    let mut normal = -ray.direction;
    for _ in 0..MAX_RAY_STEPS {
        let separation = match gjk(&PointSupport(ray.point_at(t)), shape) {
            GjkResult::Intersecting(_) => return Some((t, normal)),
            GjkResult::Separated(separation) => separation,
        };
        normal = -separation.normal;
        if separation.distance < RAY_TOLERANCE {
            return Some((t, normal));
        }
        let closing = ray.direction.dot(&separation.normal);
        if closing <= 0.0 {
            return None;
        }
        t += separation.distance / closing;
        if t > max_distance {
            return None;
        }
    }
    None
}

/// Closest ray hit on a collider of any shape kind
pub fn ray_cast_collider(collider: &Collider, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3)> {
    let pieces: Vec<WorldConvex<'_>> = if let Some(convex) = collider.world_convex() {
        vec![convex]
    } else {
        let end = ray.point_at(max_distance.min(1.0e6));
        let bounds = Aabb::new(ray.origin.inf(&end), ray.origin.sup(&end));
        let mut indices = Vec::new();
        collider.overlapping_sub_shapes(&bounds, &mut indices);
        indices.into_iter().filter_map(|i| collider.world_sub_shape(i)).collect()
    };
    pieces
        .iter()
        .filter_map(|piece| ray_cast_convex(piece, ray, max_distance))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

/// Whether a convex volume overlaps any piece of a collider, with the
/// deepest point found
pub fn volume_overlaps_collider<S: Support + ?Sized>(volume: &S, bounds: &Aabb, collider: &Collider) -> Option<Vec3> {
    let pieces: Vec<WorldConvex<'_>> = if let Some(convex) = collider.world_convex() {
        vec![convex]
    } else {
        let mut indices = Vec::new();
        collider.overlapping_sub_shapes(bounds, &mut indices);
        indices.into_iter().filter_map(|i| collider.world_sub_shape(i)).collect()
    };
    pieces.iter().find_map(|piece| match gjk(volume, piece) {
        GjkResult::Intersecting(_) => Some(piece.center()),
        GjkResult::Separated(_) => None,
    })
}
