//! Rigid-body simulation
//!
//! A [`PhysicsSpace`] owns a hierarchy of [`PhysicsNode`]s carrying
//! [`Collider`]s and [`RigidBody`]s. Each fixed sub-step runs broad phase,
//! narrow phase and continuous detection, turns manifolds into persistent
//! [`Contact`]s, solves islands and publishes the integrated transforms.

pub mod body;
pub mod broad_phase;
pub mod cast;
pub mod collider;
pub mod collision_group;
pub mod contact;
pub mod effects;
pub mod gjk;
pub mod joint;
pub mod material;
pub mod narrow_phase;
pub mod node;
pub mod shape;
pub mod solver;
pub mod space;
pub mod time_of_impact;

pub use body::{DynamicState, RigidBody, RigidBodyDesc};
pub use cast::{CastFilter, CastFilterFlags, CastResult, SweepResult};
pub use collider::{Collider, ColliderDesc, ColliderFlags};
pub use collision_group::{CollisionFilter, CollisionGroup, CollisionTable, FilterFlags};
pub use contact::{Contact, Manifold, ManifoldPoint};
pub use joint::Joint;
pub use material::PhysicsMaterial;
pub use node::PhysicsNode;
pub use shape::{Shape, ShapeKind};
pub use space::{PhysicsSpace, SpaceFlags, StepStatistics};
