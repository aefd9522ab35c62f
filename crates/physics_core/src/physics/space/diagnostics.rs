//! Tooling query explaining why two objects do not collide

use super::PhysicsSpace;
use crate::foundation::collections::NodeHandle;
use crate::physics::broad_phase::BroadPhaseProxy;
use crate::physics::collider::{should_collide_with_reason, Collider, ColliderFlags};

impl PhysicsSpace {
    /// Replay the checks the pipeline runs on a pair and describe the
    /// first one that fails, or how the pair collides if none does
    pub fn why_are_they_not_colliding(&mut self, a: NodeHandle, b: NodeHandle) -> String {
        if a == b {
            return "The same object was passed in twice.".to_owned();
        }
        self.flush();

        let describe = |node: NodeHandle| self.nodes.get(node).filter(|n| !n.is_destroyed());
        let (Some(node_a), Some(node_b)) = (describe(a), describe(b)) else {
            return "One of the objects no longer exists.".to_owned();
        };
        let (owner_a, owner_b) = (node_a.owner_id(), node_b.owner_id());
        let Some(handle_a) = node_a.collider() else {
            return format!("Object A (owner {owner_a}) doesn't have a collider.");
        };
        let Some(handle_b) = node_b.collider() else {
            return format!("Object B (owner {owner_b}) doesn't have a collider.");
        };
        let (Some(collider_a), Some(collider_b)) = (self.colliders.get(handle_a), self.colliders.get(handle_b)) else {
            return "One of the colliders no longer exists.".to_owned();
        };

        let view = self.collision_view();
        if view.is_static(collider_a) && view.is_static(collider_b) {
            return "Both colliders are static. Static colliders don't check against each other.".to_owned();
        }
        for (label, owner, collider) in [("A", owner_a, collider_a), ("B", owner_b, collider_b)] {
            if !collider.flags().contains(ColliderFlags::IN_BROAD_PHASE) {
                return format!(
                    "Collider {label} (owner {owner}) is not in the broad phase yet. Was it just created this frame?"
                );
            }
        }

        let proxy = BroadPhaseProxy {
            collider: handle_a,
            aabb: *collider_a.world_aabb(),
            sphere: *collider_a.world_sphere(),
        };
        let mut pairs = Vec::new();
        self.broad_phase.query_both(&proxy, &mut pairs);
        if !pairs.iter().any(|&(x, y)| x == handle_b || y == handle_b) {
            return "Colliders did not pass the broad phase, they are probably too far apart.".to_owned();
        }

        if view.is_asleep(collider_a) && view.is_asleep(collider_b) {
            return "Both objects are asleep.".to_owned();
        }
        if let Err(reason) = should_collide_with_reason(&view, handle_a, handle_b) {
            return reason.to_string();
        }

        let mut manifolds = Vec::new();
        if !self.narrow_phase.test_collision(&self.colliders, handle_a, handle_b, &mut manifolds) {
            return "They didn't pass collision detection, they aren't actually colliding.".to_owned();
        }

        let events = match (collider_a.sends_events(), collider_b.sends_events()) {
            (true, true) => "Both colliders send events.".to_owned(),
            (false, false) => "Both colliders don't send events.".to_owned(),
            (false, true) => format!("Collider A (owner {owner_a}) doesn't send events."),
            (true, false) => format!("Collider B (owner {owner_b}) doesn't send events."),
        };
        if collider_a.is_ghost() || collider_b.is_ghost() {
            return format!("One collider is marked ghost. {events}");
        }
        if skips_resolution(collider_a, collider_b) {
            return format!("Collision table says they skip resolution. {events}");
        }
        format!("They do collide. {events}")
    }
}

fn skips_resolution(a: &Collider, b: &Collider) -> bool {
    a.group_instance().skip_resolution(b.group_instance())
}

#[cfg(test)]
mod tests {
    use crate::foundation::math::{Transform, Vec3};
    use crate::physics::body::RigidBodyDesc;
    use crate::physics::collider::{ColliderDesc, RejectionReason};
    use crate::physics::shape::Shape;
    use crate::physics::PhysicsSpace;
    use crate::foundation::collections::NodeHandle;

    fn ball(space: &mut PhysicsSpace, x: f32, dynamic: bool) -> NodeHandle {
        let node = space.create_node(None, Transform::from_position(Vec3::new(x, 0.0, 0.0))).unwrap();
        assert!(space.add_collider(node, ColliderDesc::new(Shape::sphere(1.0))).is_ok());
        if dynamic {
            assert!(space.add_rigid_body(node, &RigidBodyDesc::dynamic()).is_ok());
        }
        node
    }

    #[test]
    fn test_explains_missing_collider_and_statics() {
        let mut space = PhysicsSpace::default();
        let a = ball(&mut space, 0.0, false);
        let b = ball(&mut space, 1.0, false);
        let bare = space.create_node(None, Transform::identity()).unwrap();

        assert!(space.why_are_they_not_colliding(a, bare).contains("doesn't have a collider"));
        assert!(space.why_are_they_not_colliding(a, b).starts_with("Both colliders are static"));
    }

    #[test]
    fn test_explains_distance_filters_and_contact() {
        let mut space = PhysicsSpace::default();
        let a = ball(&mut space, 0.0, true);
        let near = ball(&mut space, 1.5, false);
        let far = ball(&mut space, 10.0, false);

        assert!(space.why_are_they_not_colliding(a, far).contains("did not pass the broad phase"));
        assert!(space.why_are_they_not_colliding(a, near).starts_with("They do collide."));

        assert!(space.add_pair_filter(a, near).is_ok());
        assert_eq!(space.why_are_they_not_colliding(a, near), RejectionReason::PairFilter.to_string());
    }
}


