//! Error types for the physics core
//!
//! Only consistency errors surface as `Err`. Configuration problems are
//! clamped with a warning and degenerate geometry falls back to safe
//! defaults, so neither ever aborts a frame.

use thiserror::Error;

/// Consistency errors surfaced to callers of the physics core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhysicsError {
    /// A handle no longer refers to a live object
    #[error("Invalid handle: {0}")]
    InvalidHandle(&'static str),

    /// The contact pool has no free slots
    #[error("Contact pool exhausted (capacity {capacity})")]
    ContactPoolExhausted {
        /// Configured pool size
        capacity: usize,
    },

    /// The collision table cannot register another group
    #[error("Collision table is full (capacity {capacity})")]
    GroupTableFull {
        /// Configured group cap
        capacity: usize,
    },

    /// A collision group has no instance in the table being queried
    #[error("Collision group instance missing: {0}")]
    MissingGroupInstance(String),

    /// An object was mutated after its owner was torn down
    #[error("Object mutated after destruction: {0}")]
    DestroyedOwner(String),

    /// Two objects that must share a space do not
    #[error("Objects belong to different spaces")]
    DifferentSpaces,
}

/// Result type for fallible physics operations
pub type PhysicsResult<T> = Result<T, PhysicsError>;
