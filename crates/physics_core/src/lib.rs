//! # Physics Core
//!
//! A fixed-step rigid-body physics core for game engines.
//!
//! ## Features
//!
//! - **Collision filtering**: group tables, pair filters and joint rules
//! - **Persistent contacts**: stable contact identity for warm starting and events
//! - **Deferred node queue**: transform, mass and broad phase changes committed in batches
//! - **Continuous collision**: time of impact sweeps for fast bodies
//! - **Casts**: rays, segments, volumes, frusta and collider sweeps
//!
//! ## Quick Start
//!
//! ```rust
//! use physics_core::prelude::*;
//!
//! let mut engine = PhysicsEngine::new();
//! let handle = engine.create_space(PhysicsSpaceConfig::default().with_sub_steps(2));
//! let Some(space) = engine.space_mut(handle) else { return };
//!
//! let ground = space.create_node(None, Transform::identity()).unwrap();
//! space.add_collider(ground, ColliderDesc::new(Shape::cuboid(Vec3::new(10.0, 0.5, 10.0)))).unwrap();
//!
//! let ball = space.create_node(None, Transform::from_position(Vec3::new(0.0, 5.0, 0.0))).unwrap();
//! space.add_collider(ball, ColliderDesc::new(Shape::sphere(0.5))).unwrap();
//! space.add_rigid_body(ball, &RigidBodyDesc::dynamic()).unwrap();
//!
//! for _ in 0..60 {
//!     engine.update(1.0 / 60.0);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod foundation;
pub mod physics;

pub use engine::{PhysicsEngine, PhysicsResources};
pub use error::{PhysicsError, PhysicsResult};

/// Common imports for physics users
pub mod prelude {
    pub use crate::{
        config::{Config, PhysicsSpaceConfig, SolverConfig},
        engine::{PhysicsEngine, PhysicsResources},
        error::{PhysicsError, PhysicsResult},
        events::{EventRecorder, PhysicsEvent, PhysicsEventHandler, PhysicsEventType},
        foundation::{
            collections::{BodyHandle, ColliderHandle, ContactHandle, JointHandle, NodeHandle, SpaceHandle},
            math::{Aabb, Frustum, Quat, Ray, Segment, Sphere, Transform, Vec3},
        },
        physics::{
            CastFilter, CastFilterFlags, Collider, ColliderDesc, CollisionFilter, CollisionGroup, CollisionTable,
            DynamicState, FilterFlags, PhysicsMaterial, PhysicsSpace, RigidBody, RigidBodyDesc, Shape,
        },
    };
}
