//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the physics core:
//! - Math types and bounding volumes
//! - Handle types and pooled storage
//! - Logging utilities

pub mod math;
pub mod collections;
pub mod logging;
