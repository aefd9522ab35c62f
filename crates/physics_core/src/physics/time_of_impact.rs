//! # Time of Impact
//!
//! Continuous collision detection by bilateral advancement. Both shapes
//! move rigidly over the sub-step; GJK supplies a separating axis at the
//! current time, the separation along that axis is bisected for its root,
//! and GJK runs again at the root to refresh the axis. The pair is hit once
//! the true distance drops under [`TOI_TOLERANCE`].
//!
//! Pairs that already overlap at the start are left to the discrete pass.

use log::trace;

use super::body::RigidBody;
use super::collider::Collider;
use super::contact::{Manifold, ManifoldPoint};
use super::gjk::{gjk, penetration, GjkResult, Separation};
use super::narrow_phase::{contact_id, pieces_overlapping, PairSide};
use super::shape::{support_aabb, Support, SweptConvex, WorldConvex};
use crate::foundation::collections::{ColliderHandle, HandleMap};
use crate::foundation::math::{Aabb, Quat, Vec3};

/// Distance at which two moving shapes count as touching
pub const TOI_TOLERANCE: f32 = 0.001;

/// Separations under this are handed to EPA instead of GJK closest points
const TOUCHING_DISTANCE: f32 = 1.0e-5;
const MAX_ADVANCEMENTS: usize = 32;
const MAX_ROOT_ITERATIONS: usize = 50;

/// Rigid motion of a shape over one sub-step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    /// Linear velocity
    pub velocity: Vec3,
    /// Angular velocity about `pivot`
    pub angular_velocity: Vec3,
    /// Rotation center, normally the body's center of mass
    pub pivot: Vec3,
}

impl Default for Motion {
    fn default() -> Self {
        Self::stationary()
    }
}

impl Motion {
    /// No motion at all
    pub fn stationary() -> Self {
        Self::linear(Vec3::zeros())
    }

    /// Pure translation
    pub fn linear(velocity: Vec3) -> Self {
        Self {
            velocity,
            angular_velocity: Vec3::zeros(),
            pivot: Vec3::zeros(),
        }
    }

    /// Motion of a body, rotating about its center of mass
    pub fn of_body(body: &RigidBody) -> Self {
        Self {
            velocity: body.velocity(),
            angular_velocity: body.angular_velocity(),
            pivot: body.center_of_mass(),
        }
    }

    /// Whether the motion rotates the shape
    pub fn is_rotating(&self) -> bool {
        self.angular_velocity.norm_squared() > 0.0
    }

    fn at<'a>(&self, shape: WorldConvex<'a>, time: f32) -> SweptConvex<'a> {
        SweptConvex {
            base: shape,
            pivot: self.pivot,
            delta_position: self.velocity * time,
            delta_rotation: Quat::from_scaled_axis(self.angular_velocity * time),
        }
    }
}

/// A pair hit found within the sub-step
#[derive(Debug, Clone, PartialEq)]
pub struct TimeOfImpactResult {
    /// Time from the start of the sub-step
    pub time: f32,
    /// Approximate contact at that time, first collider is the query's `a`
    pub manifold: Manifold,
}

/// Signed distance between the shapes along `normal`
fn axis_separation<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B, normal: &Vec3) -> f32 {
    normal.dot(&(b.support(&-normal) - a.support(normal)))
}

/// Bisect `[low, high]` for a time at which `separation` is within
/// `[0, tolerance]`. The separation must exceed `tolerance` at `low`.
fn find_root(mut low: f32, mut high: f32, tolerance: f32, separation: impl Fn(f32) -> f32) -> Option<f32> {
    if separation(high) > tolerance {
        return None;
    }
    for _ in 0..MAX_ROOT_ITERATIONS {
        let mid = 0.5 * (low + high);
        let s = separation(mid);
        if s > tolerance {
            low = mid;
        } else if s < 0.0 {
            high = mid;
        } else {
            return Some(mid);
        }
        if high - low <= f32::EPSILON * high.abs().max(1.0) {
            break;
        }
    }
    Some(low)
}

fn bounding_radius<S: Support + ?Sized>(shape: &S, pivot: &Vec3) -> f32 {
    let bounds = support_aabb(shape);
    let far = bounds.center() - pivot;
    far.norm() + bounds.half_extents().norm()
}

/// Upper bound of how fast the gap along `normal` can close
fn closing_speed_bound(
    a: &WorldConvex<'_>,
    motion_a: &Motion,
    b: &WorldConvex<'_>,
    motion_b: &Motion,
    normal: &Vec3,
) -> f32 {
    let mut bound = (motion_a.velocity - motion_b.velocity).dot(normal);
    if motion_a.is_rotating() {
        bound += motion_a.angular_velocity.norm() * bounding_radius(a, &motion_a.pivot);
    }
    if motion_b.is_rotating() {
        bound += motion_b.angular_velocity.norm() * bounding_radius(b, &motion_b.pivot);
    }
    bound
}

fn contact_at<A: Support + ?Sized, B: Support + ?Sized>(a: &A, b: &B, separation: Option<&Separation>) -> Option<ManifoldPoint> {
    match separation {
        Some(sep) if sep.distance >= TOUCHING_DISTANCE => {
            Some(ManifoldPoint::new(sep.point_a, sep.point_b, sep.normal, -sep.distance))
        }
        _ => penetration(a, b)
            .map(|hit| ManifoldPoint::new(hit.point_a, hit.point_b, hit.normal, hit.depth))
            .or_else(|| separation.map(|sep| ManifoldPoint::new(sep.point_a, sep.point_b, sep.normal, -sep.distance))),
    }
}

/// Earliest time within `[0, dt]` at which two convex shapes touch.
///
/// Returns `None` when they already overlap at the start, never get
/// within [`TOI_TOLERANCE`] of each other, or are moving apart.
pub fn convex_time_of_impact(
    a: &WorldConvex<'_>,
    motion_a: &Motion,
    b: &WorldConvex<'_>,
    motion_b: &Motion,
    dt: f32,
) -> Option<(f32, ManifoldPoint)> {
    if dt <= 0.0 {
        return None;
    }
    let mut time = 0.0;
    let mut separation = match gjk(&motion_a.at(*a, 0.0), &motion_b.at(*b, 0.0)) {
        GjkResult::Intersecting(_) => return None,
        GjkResult::Separated(separation) => separation,
    };

    for _ in 0..MAX_ADVANCEMENTS {
        if separation.distance < TOI_TOLERANCE {
            let contact = contact_at(&motion_a.at(*a, time), &motion_b.at(*b, time), Some(&separation))?;
            return Some((time, contact));
        }

        let normal = separation.normal;
        if closing_speed_bound(a, motion_a, b, motion_b, &normal) <= 0.0 {
            return None;
        }

        let along_axis = |t: f32| axis_separation(&motion_a.at(*a, t), &motion_b.at(*b, t), &normal);
        time = find_root(time, dt, TOI_TOLERANCE, along_axis)?;

        let swept_a = motion_a.at(*a, time);
        let swept_b = motion_b.at(*b, time);
        separation = match gjk(&swept_a, &swept_b) {
            GjkResult::Separated(separation) => separation,
            GjkResult::Intersecting(_) => {
                // Rotation carried the shapes past the axis root
                let contact = contact_at(&swept_a, &swept_b, None)?;
                return Some((time, contact));
            }
        };
    }
    trace!("time of impact gave up after {MAX_ADVANCEMENTS} advancements at t = {time}");
    None
}

/// Bounds of a collider over its whole motion
pub fn swept_bounds(collider: &Collider, motion: &Motion, dt: f32) -> Aabb {
    let start = *collider.world_aabb();
    let end = Aabb::new(start.min + motion.velocity * dt, start.max + motion.velocity * dt);
    let mut bounds = start.merged(&end);
    if motion.is_rotating() {
        let sphere = collider.world_sphere();
        let reach = (sphere.center - motion.pivot).norm() + sphere.radius;
        let spin = (motion.angular_velocity.norm() * dt).min(std::f32::consts::PI);
        bounds = bounds.expanded(reach * spin);
    }
    bounds
}

/// Region `other` sweeps through as seen from `own`'s starting placement.
///
/// Pieces of `own` are stored at their start positions, so `other` travels
/// by the relative velocity. A rotating `own` moves its pieces as well,
/// which pads the box by the farthest any of them can reach.
fn relative_bounds(other: &Collider, motion_other: &Motion, own: &Collider, motion_own: &Motion, dt: f32) -> Aabb {
    let relative = Motion {
        velocity: motion_other.velocity - motion_own.velocity,
        ..*motion_other
    };
    let bounds = swept_bounds(other, &relative, dt);
    if !motion_own.is_rotating() {
        return bounds;
    }
    let sphere = own.world_sphere();
    let reach = (sphere.center - motion_own.pivot).norm() + sphere.radius;
    let spin = (motion_own.angular_velocity.norm() * dt).min(std::f32::consts::PI);
    bounds.expanded(reach * spin)
}

/// Time of impact between two colliders of any shape kind.
///
/// Complex colliders are narrowed to the sub-shapes inside the other
/// collider's swept bounds first. Every sub-shape pair that is hit is
/// reported, ordered by time.
pub fn time_of_impact(
    colliders: &HandleMap<ColliderHandle, Collider>,
    a: ColliderHandle,
    motion_a: &Motion,
    b: ColliderHandle,
    motion_b: &Motion,
    dt: f32,
    out: &mut Vec<TimeOfImpactResult>,
) -> bool {
    let (Some(collider_a), Some(collider_b)) = (colliders.get(a), colliders.get(b)) else {
        return false;
    };
    let side_a = PairSide { handle: a, collider: collider_a };
    let side_b = PairSide { handle: b, collider: collider_b };
    let a_complex = collider_a.kind().is_complex();
    let b_complex = collider_b.kind().is_complex();

    let bounds_a = relative_bounds(collider_a, motion_a, collider_b, motion_b, dt);
    let bounds_b = relative_bounds(collider_b, motion_b, collider_a, motion_a, dt);

    let start = out.len();
    for (index_a, piece_a) in pieces_overlapping(&side_a, &bounds_b) {
        for (index_b, piece_b) in pieces_overlapping(&side_b, &bounds_a) {
            let Some((time, point)) = convex_time_of_impact(&piece_a, motion_a, &piece_b, motion_b, dt) else {
                continue;
            };
            let mut manifold = Manifold::new(a, b, contact_id(index_a, index_b, a_complex, b_complex));
            manifold.push_point(point);
            out.push(TimeOfImpactResult { time, manifold });
        }
    }
    out[start..].sort_by(|x, y| x.time.total_cmp(&y.time));
    out.len() > start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Transform;
    use crate::physics::shape::LocalConvex;
    use approx::assert_relative_eq;

    fn sphere_at(x: f32, radius: f32) -> WorldConvex<'static> {
        WorldConvex::new(LocalConvex::Sphere(radius), Transform::from_position(Vec3::new(x, 0.0, 0.0)))
    }

    fn thin_wall() -> WorldConvex<'static> {
        WorldConvex::new(LocalConvex::Box(Vec3::new(0.025, 5.0, 5.0)), Transform::identity())
    }

    #[test]
    fn test_fast_sphere_hits_thin_wall() {
        let dt = 1.0 / 60.0;
        let motion = Motion::linear(Vec3::new(100.0, 0.0, 0.0));
        let (time, point) = convex_time_of_impact(&sphere_at(-1.0, 0.1), &motion, &thin_wall(), &Motion::stationary(), dt)
            .expect("fast sphere tunneled through the wall");
        assert!(time > 0.0 && time < dt);
        assert_relative_eq!(time, 0.00875, epsilon = 2.0e-5);
        assert_relative_eq!(point.normal, Vec3::x(), epsilon = 1.0e-3);
        assert!(point.penetration.abs() < TOI_TOLERANCE);
    }

    #[test]
    fn test_receding_shapes_never_hit() {
        let dt = 1.0 / 60.0;
        let result = convex_time_of_impact(
            &sphere_at(-1.0, 0.1),
            &Motion::linear(Vec3::new(-100.0, 0.0, 0.0)),
            &thin_wall(),
            &Motion::stationary(),
            dt,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_too_slow_to_reach() {
        let result = convex_time_of_impact(
            &sphere_at(-1.0, 0.1),
            &Motion::linear(Vec3::new(1.0, 0.0, 0.0)),
            &thin_wall(),
            &Motion::stationary(),
            1.0 / 60.0,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_overlapping_start_is_left_to_discrete_pass() {
        let result = convex_time_of_impact(
            &sphere_at(0.0, 0.1),
            &Motion::linear(Vec3::new(10.0, 0.0, 0.0)),
            &thin_wall(),
            &Motion::stationary(),
            1.0 / 60.0,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_both_moving_meet_in_the_middle() {
        let (time, _) = convex_time_of_impact(
            &sphere_at(-1.0, 0.5),
            &Motion::linear(Vec3::new(10.0, 0.0, 0.0)),
            &sphere_at(1.0, 0.5),
            &Motion::linear(Vec3::new(-10.0, 0.0, 0.0)),
            0.1,
        ).expect("approaching spheres never met");
        assert_relative_eq!(time, 0.05, epsilon = 1.0e-4);
    }

    #[test]
    fn test_find_root_brackets() {
        let root = find_root(0.0, 1.0, 0.001, |t| 0.5 - t).unwrap();
        assert!((0.499..=0.5).contains(&root));
        assert!(find_root(0.0, 1.0, 0.001, |t| 2.0 - t).is_none());
    }
}
