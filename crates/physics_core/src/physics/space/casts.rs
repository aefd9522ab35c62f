//! Ray, volume and sweep queries against a space.
//!
//! Every query flushes queued changes first, so results never reference a
//! stale transform or a collider that was already removed.

use super::PhysicsSpace;
use crate::foundation::collections::ColliderHandle;
use crate::foundation::math::{Aabb, Frustum, Ray, Segment, Sphere, Transform, Vec3};
use crate::physics::body::RigidBody;
use crate::physics::cast::{finish_results, ray_cast_collider, volume_overlaps_collider, CastFilter, CastResult, SweepResult};
use crate::physics::collider::Collider;
use crate::physics::shape::{LocalConvex, Support, WorldConvex};
use crate::physics::time_of_impact::{swept_bounds, time_of_impact, Motion};

impl PhysicsSpace {
    /// Colliders a ray hits within `max_distance`, closest first
    pub fn cast_ray(&mut self, ray: &Ray, max_distance: f32, filter: &CastFilter) -> Vec<CastResult> {
        self.flush();
        let mut candidates = Vec::new();
        self.broad_phase.cast_ray(ray, max_distance, &mut candidates);

        let mut results: Vec<CastResult> = self
            .accepted(candidates, filter)
            .filter_map(|(handle, collider)| {
                let (time, normal) = ray_cast_collider(collider, ray, max_distance)?;
                Some(CastResult { collider: handle, time, world_point: ray.point_at(time), normal })
            })
            .collect();
        finish_results(&mut results, filter.max_results, |r| r.time);
        results
    }

    /// Closest collider a ray hits
    pub fn cast_ray_first(&mut self, ray: &Ray, max_distance: f32, filter: &CastFilter) -> Option<CastResult> {
        let filter = filter.clone().with_max_results(1);
        self.cast_ray(ray, max_distance, &filter).into_iter().next()
    }

    /// Colliders a segment touches, closest to its start first
    pub fn cast_segment(&mut self, segment: &Segment, filter: &CastFilter) -> Vec<CastResult> {
        let ray = Ray::new(segment.start, segment.end - segment.start);
        self.cast_ray(&ray, segment.length(), filter)
    }

    /// Colliders overlapping a box
    pub fn cast_aabb(&mut self, aabb: &Aabb, filter: &CastFilter) -> Vec<CastResult> {
        self.flush();
        let mut candidates = Vec::new();
        self.broad_phase.cast_aabb(aabb, &mut candidates);
        let volume = WorldConvex::new(LocalConvex::Box(aabb.half_extents()), Transform::from_position(aabb.center()));
        self.volume_results(candidates, &volume, aabb, filter)
    }

    /// Colliders overlapping a sphere
    pub fn cast_sphere(&mut self, sphere: &Sphere, filter: &CastFilter) -> Vec<CastResult> {
        self.flush();
        let mut candidates = Vec::new();
        self.broad_phase.cast_sphere(sphere, &mut candidates);
        let volume = WorldConvex::new(LocalConvex::Sphere(sphere.radius), Transform::from_position(sphere.center));
        self.volume_results(candidates, &volume, &sphere.to_aabb(), filter)
    }

    /// Colliders inside or crossing a frustum. Convex colliders are
    /// rejected when they lie fully behind one plane; complex ones are
    /// judged by their bounds.
    pub fn cast_frustum(&mut self, frustum: &Frustum, filter: &CastFilter) -> Vec<CastResult> {
        self.flush();
        let mut candidates = Vec::new();
        self.broad_phase.cast_frustum(frustum, &mut candidates);

        let mut results: Vec<CastResult> = self
            .accepted(candidates, filter)
            .filter(|(_, collider)| match collider.world_convex() {
                Some(convex) => frustum
                    .planes
                    .iter()
                    .all(|plane| plane.signed_distance(&convex.support(&plane.normal)) >= 0.0),
                None => frustum.overlaps_aabb(collider.world_aabb()),
            })
            .map(|(handle, collider)| CastResult {
                collider: handle,
                time: 0.0,
                world_point: collider.world_aabb().center(),
                normal: Vec3::zeros(),
            })
            .collect();
        finish_results(&mut results, filter.max_results, |r| r.time);
        results
    }

    /// Sweep a collider along `velocity` for `dt` seconds. Colliders it
    /// already overlaps are reported at time zero with their overlap.
    pub fn sweep_collider(
        &mut self,
        handle: ColliderHandle,
        velocity: Vec3,
        dt: f32,
        filter: &CastFilter,
    ) -> Vec<SweepResult> {
        self.flush();
        let Some(collider) = self.colliders.get(handle) else {
            return Vec::new();
        };
        let motion = Motion::linear(velocity);
        let mut candidates = Vec::new();
        self.broad_phase.cast_aabb(&swept_bounds(collider, &motion, dt), &mut candidates);
        candidates.retain(|other| *other != handle);

        let others: Vec<ColliderHandle> = self.accepted(candidates, filter).map(|(other, _)| other).collect();
        let mut results = Vec::new();
        let mut impacts = Vec::new();
        let mut manifolds = Vec::new();
        for other in others {
            manifolds.clear();
            if self.narrow_phase.test_collision(&self.colliders, handle, other, &mut manifolds) {
                if let Some(point) = manifolds.iter().flat_map(|m| m.points()).max_by(|a, b| a.penetration.total_cmp(&b.penetration)) {
                    results.push(SweepResult {
                        other,
                        time: 0.0,
                        penetration: point.penetration,
                        world_point: point.world_b,
                        normal: -point.normal,
                    });
                }
                continue;
            }

            impacts.clear();
            if !time_of_impact(&self.colliders, handle, &motion, other, &Motion::stationary(), dt, &mut impacts) {
                continue;
            }
            let first = impacts.first().and_then(|impact| Some((impact.time, *impact.manifold.points().first()?)));
            if let Some((time, point)) = first {
                results.push(SweepResult {
                    other,
                    time,
                    penetration: point.penetration,
                    world_point: point.world_b,
                    normal: -point.normal,
                });
            }
        }
        finish_results(&mut results, filter.max_results, |r| r.time);
        results
    }

    /// Colliders that `handle` would overlap if it were moved by `offset`.
    /// The collider is put back before returning.
    pub fn cast_collider(&mut self, handle: ColliderHandle, offset: Vec3, filter: &CastFilter) -> Vec<CastResult> {
        self.flush();
        let Some(original) = self.colliders.get(handle).map(|c| *c.world_transform()) else {
            return Vec::new();
        };
        let moved = Transform { position: original.position + offset, ..original };
        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.update_world(&moved);
        }

        let mut candidates = Vec::new();
        if let Some(collider) = self.colliders.get(handle) {
            self.broad_phase.cast_aabb(collider.world_aabb(), &mut candidates);
        }
        candidates.retain(|other| *other != handle);
        let others: Vec<ColliderHandle> = self.accepted(candidates, filter).map(|(other, _)| other).collect();

        let mut results = Vec::new();
        let mut manifolds = Vec::new();
        for other in others {
            manifolds.clear();
            if !self.narrow_phase.test_collision(&self.colliders, handle, other, &mut manifolds) {
                continue;
            }
            if let Some(point) = manifolds.iter().flat_map(|m| m.points()).next() {
                results.push(CastResult { collider: other, time: 0.0, world_point: point.world_b, normal: -point.normal });
            }
        }

        if let Some(collider) = self.colliders.get_mut(handle) {
            collider.update_world(&original);
        }
        finish_results(&mut results, filter.max_results, |r| r.time);
        results
    }

    fn volume_results<S: Support>(
        &self,
        candidates: Vec<ColliderHandle>,
        volume: &S,
        bounds: &Aabb,
        filter: &CastFilter,
    ) -> Vec<CastResult> {
        let mut results: Vec<CastResult> = self
            .accepted(candidates, filter)
            .filter_map(|(handle, collider)| {
                let world_point = volume_overlaps_collider(volume, bounds, collider)?;
                Some(CastResult { collider: handle, time: 0.0, world_point, normal: Vec3::zeros() })
            })
            .collect();
        finish_results(&mut results, filter.max_results, |r| r.time);
        results
    }

    /// Candidates that exist and pass the filter, in creation order
    fn accepted<'a>(
        &'a self,
        mut candidates: Vec<ColliderHandle>,
        filter: &'a CastFilter,
    ) -> impl Iterator<Item = (ColliderHandle, &'a Collider)> + 'a {
        candidates.sort_by_key(|handle| self.colliders.get(*handle).map_or(u32::MAX, Collider::id));
        candidates.dedup();
        candidates.into_iter().filter_map(move |handle| {
            let collider = self.colliders.get(handle)?;
            let body = collider.active_body().and_then(|b| self.bodies.get(b));
            let is_dynamic = body.is_some_and(RigidBody::is_dynamic);
            let is_kinematic = body.is_some_and(RigidBody::is_kinematic);
            filter.accepts(handle, collider, is_dynamic, is_kinematic).then_some((handle, collider))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body::RigidBodyDesc;
    use crate::physics::cast::CastFilterFlags;
    use crate::physics::collider::ColliderDesc;
    use crate::physics::shape::Shape;
    use approx::assert_relative_eq;

    fn sphere_at(space: &mut PhysicsSpace, position: Vec3, radius: f32) -> ColliderHandle {
        let node = space.create_node(None, Transform::from_position(position)).unwrap();
        let collider = space.add_collider(node, ColliderDesc::new(Shape::sphere(radius))).unwrap();
        collider
    }

    #[test]
    fn test_ray_hits_closest_first() {
        let mut space = PhysicsSpace::default();
        let far = sphere_at(&mut space, Vec3::new(10.0, 0.0, 0.0), 1.0);
        let near = sphere_at(&mut space, Vec3::new(5.0, 0.0, 0.0), 1.0);
        sphere_at(&mut space, Vec3::new(0.0, 10.0, 0.0), 1.0);

        let ray = Ray::new(Vec3::zeros(), Vec3::x());
        let results = space.cast_ray(&ray, 100.0, &CastFilter::new());
        let hits: Vec<ColliderHandle> = results.iter().map(|r| r.collider).collect();
        assert_eq!(hits, vec![near, far]);
        assert_relative_eq!(results[0].time, 4.0, epsilon = 2.0e-3);

        let first = space.cast_ray_first(&ray, 100.0, &CastFilter::new()).expect("ray should hit the near sphere");
        assert_eq!(first.collider, near);
        assert!(space.cast_ray(&ray, 3.0, &CastFilter::new()).is_empty());
    }

    #[test]
    fn test_cast_filter_skips_static_colliders() {
        let mut space = PhysicsSpace::default();
        sphere_at(&mut space, Vec3::new(5.0, 0.0, 0.0), 1.0);
        let filter = CastFilter::new().with_flags(CastFilterFlags::IGNORE_STATIC);
        let ray = Ray::new(Vec3::zeros(), Vec3::x());
        assert!(space.cast_ray(&ray, 100.0, &filter).is_empty());
    }

    #[test]
    fn test_volume_casts_see_pending_moves() {
        let mut space = PhysicsSpace::default();
        let collider = sphere_at(&mut space, Vec3::zeros(), 0.5);
        let node = space.collider(collider).map(Collider::node).unwrap();
        assert!(space.set_local_transform(node, Transform::from_position(Vec3::new(20.0, 0.0, 0.0))).is_ok());

        let at_origin = space.cast_sphere(&Sphere::new(Vec3::zeros(), 1.0), &CastFilter::new());
        assert!(at_origin.is_empty());
        let moved = space.cast_aabb(&Aabb::new(Vec3::new(19.0, -1.0, -1.0), Vec3::new(21.0, 1.0, 1.0)), &CastFilter::new());
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].collider, collider);
    }

    #[test]
    fn test_sweep_reports_time_of_first_contact() {
        let mut space = PhysicsSpace::default();
        let wall = {
            let node = space.create_node(None, Transform::identity()).unwrap();
            let wall = space.add_collider(node, ColliderDesc::new(Shape::cuboid(Vec3::new(0.025, 5.0, 5.0)))).unwrap();
            wall
        };
        let node = space.create_node(None, Transform::from_position(Vec3::new(-1.0, 0.0, 0.0))).unwrap();
        let ball = space.add_collider(node, ColliderDesc::new(Shape::sphere(0.1))).unwrap();
        assert!(space.add_rigid_body(node, &RigidBodyDesc::dynamic()).is_ok());

        let results = space.sweep_collider(ball, Vec3::new(100.0, 0.0, 0.0), 1.0 / 60.0, &CastFilter::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].other, wall);
        assert!(results[0].time > 0.0 && results[0].time < 1.0 / 60.0);
        assert_relative_eq!(results[0].normal, -Vec3::x(), epsilon = 1.0e-3);
    }

    #[test]
    fn test_cast_collider_restores_position() {
        let mut space = PhysicsSpace::default();
        let mover = sphere_at(&mut space, Vec3::zeros(), 0.5);
        let target = sphere_at(&mut space, Vec3::new(3.0, 0.0, 0.0), 0.5);

        let hits = space.cast_collider(mover, Vec3::new(2.8, 0.0, 0.0), &CastFilter::new());
        assert_eq!(hits.iter().map(|r| r.collider).collect::<Vec<_>>(), vec![target]);
        assert!(space.collider(mover).is_some_and(|c| c.world_transform().position == Vec3::zeros()));
        assert!(space.cast_collider(mover, Vec3::zeros(), &CastFilter::new()).is_empty());
    }
}


