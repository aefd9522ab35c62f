//! # Physics Space Configuration
//!
//! Settings a [`PhysicsSpace`](crate::physics::PhysicsSpace) is created
//! with. Out-of-range values are never fatal: [`PhysicsSpaceConfig::sanitized`]
//! clamps them and logs a warning per field, while `validate` reports the
//! first problem for tooling that prefers to reject bad files.

use log::warn;
use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::foundation::math::Vec3;

/// Smallest allowed sub-step count
pub const MIN_SUB_STEPS: u32 = 1;
/// Largest allowed sub-step count
pub const MAX_SUB_STEPS: u32 = 50;

/// # Solver Configuration
///
/// Tuning for the default island solver and body sleeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Sequential impulse passes per step
    pub velocity_iterations: u32,
    /// Position projection passes per step
    pub position_iterations: u32,
    /// Fraction of penetration corrected per position pass
    pub baumgarte: f32,
    /// Penetration allowed before position correction kicks in
    pub penetration_slop: f32,
    /// Closing speed below which restitution is ignored
    pub restitution_threshold: f32,
    /// Linear speed under which a body accumulates sleep time
    pub linear_sleep_epsilon: f32,
    /// Angular speed under which a body accumulates sleep time
    pub angular_sleep_epsilon: f32,
    /// Seconds of rest before a body is put to sleep
    pub time_to_sleep: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: 10,
            position_iterations: 4,
            baumgarte: 0.2,
            penetration_slop: 0.01,
            restitution_threshold: 1.0,
            linear_sleep_epsilon: 0.16,
            angular_sleep_epsilon: 0.16,
            time_to_sleep: 1.0,
        }
    }
}

impl SolverConfig {
    /// Set iteration counts
    #[must_use]
    pub const fn with_iterations(mut self, velocity: u32, position: u32) -> Self {
        self.velocity_iterations = velocity;
        self.position_iterations = position;
        self
    }

    /// Set the rest time before sleeping
    #[must_use]
    pub const fn with_time_to_sleep(mut self, seconds: f32) -> Self {
        self.time_to_sleep = seconds;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.velocity_iterations == 0 {
            return Err(ConfigError::Invalid("velocity_iterations must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.baumgarte) {
            return Err(ConfigError::Invalid(format!("baumgarte {} must be within [0, 1]", self.baumgarte)));
        }
        if self.penetration_slop < 0.0 || self.time_to_sleep < 0.0 {
            return Err(ConfigError::Invalid("slop and time_to_sleep cannot be negative".to_string()));
        }
        Ok(())
    }
}

/// # Physics Space Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSpaceConfig {
    /// Fixed sub-steps per frame, within [`MIN_SUB_STEPS`]..=[`MAX_SUB_STEPS`]
    pub sub_step_count: u32,
    /// Whether bodies are allowed to fall asleep
    pub allow_sleep: bool,
    /// Default 2D mode for bodies that inherit it from the space
    pub mode_2d: bool,
    /// Sort candidate pairs so results do not depend on insertion order
    pub deterministic: bool,
    /// Acceleration applied by the built-in gravity effect
    pub gravity: Vec3,
    /// Velocities are clamped to this magnitude per axis
    pub max_velocity: f32,
    /// Maximum number of live contacts
    pub contact_pool_capacity: usize,
    /// Maximum number of collision groups a table may register
    pub max_collision_groups: usize,
    /// Active solver configuration
    pub solver: SolverConfig,
}

impl Default for PhysicsSpaceConfig {
    fn default() -> Self {
        Self {
            sub_step_count: 1,
            allow_sleep: true,
            mode_2d: false,
            deterministic: false,
            gravity: Vec3::new(0.0, -10.0, 0.0),
            max_velocity: 1.0e10,
            contact_pool_capacity: 1000,
            max_collision_groups: 31,
            solver: SolverConfig::default(),
        }
    }
}

impl Config for PhysicsSpaceConfig {}

impl PhysicsSpaceConfig {
    /// Set the sub-step count (clamped later by [`Self::sanitized`])
    #[must_use]
    pub const fn with_sub_steps(mut self, sub_steps: u32) -> Self {
        self.sub_step_count = sub_steps;
        self
    }

    /// Enable or disable sleeping
    #[must_use]
    pub const fn with_allow_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    /// Enable or disable 2D mode
    #[must_use]
    pub const fn with_mode_2d(mut self, mode_2d: bool) -> Self {
        self.mode_2d = mode_2d;
        self
    }

    /// Enable or disable stable pair ordering
    #[must_use]
    pub const fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Set gravity
    #[must_use]
    pub const fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the contact pool capacity
    #[must_use]
    pub const fn with_contact_pool_capacity(mut self, capacity: usize) -> Self {
        self.contact_pool_capacity = capacity;
        self
    }

    /// Set how many collision groups a table may register
    #[must_use]
    pub const fn with_max_collision_groups(mut self, max_groups: usize) -> Self {
        self.max_collision_groups = max_groups;
        self
    }

    /// Set the solver configuration
    #[must_use]
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SUB_STEPS..=MAX_SUB_STEPS).contains(&self.sub_step_count) {
            return Err(ConfigError::Invalid(format!(
                "sub_step_count {} must be within [{MIN_SUB_STEPS}, {MAX_SUB_STEPS}]",
                self.sub_step_count
            )));
        }
        if self.contact_pool_capacity == 0 {
            return Err(ConfigError::Invalid("contact_pool_capacity must be at least 1".to_string()));
        }
        if self.max_collision_groups == 0 || self.max_collision_groups > 32 {
            return Err(ConfigError::Invalid(format!(
                "max_collision_groups {} must be within [1, 32]",
                self.max_collision_groups
            )));
        }
        if self.max_velocity <= 0.0 {
            return Err(ConfigError::Invalid("max_velocity must be positive".to_string()));
        }
        self.solver.validate()
    }

    /// Copy with every out-of-range value clamped, warning once per field
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        if !(MIN_SUB_STEPS..=MAX_SUB_STEPS).contains(&config.sub_step_count) {
            warn!(
                "The sub-step count of physics must be between {MIN_SUB_STEPS} and {MAX_SUB_STEPS}. \
                 The value {} has been clamped.",
                config.sub_step_count
            );
            config.sub_step_count = config.sub_step_count.clamp(MIN_SUB_STEPS, MAX_SUB_STEPS);
        }
        if config.contact_pool_capacity == 0 {
            warn!("contact_pool_capacity of 0 raised to 1");
            config.contact_pool_capacity = 1;
        }
        if config.max_collision_groups == 0 || config.max_collision_groups > 32 {
            warn!("max_collision_groups {} clamped to [1, 32]", config.max_collision_groups);
            config.max_collision_groups = config.max_collision_groups.clamp(1, 32);
        }
        if config.max_velocity <= 0.0 {
            warn!("max_velocity {} reset to default", config.max_velocity);
            config.max_velocity = Self::default().max_velocity;
        }
        if config.solver.velocity_iterations == 0 {
            warn!("velocity_iterations of 0 raised to 1");
            config.solver.velocity_iterations = 1;
        }
        config.solver.baumgarte = config.solver.baumgarte.clamp(0.0, 1.0);
        config.solver.penetration_slop = config.solver.penetration_slop.max(0.0);
        config.solver.time_to_sleep = config.solver.time_to_sleep.max(0.0);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;
    use std::path::Path;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PhysicsSpaceConfig::default().validate().is_ok());
        assert_eq!(PhysicsSpaceConfig::default().contact_pool_capacity, 1000);
        assert_eq!(PhysicsSpaceConfig::default().max_collision_groups, 31);
    }

    #[test]
    fn test_sanitize_clamps_sub_steps() {
        let config = PhysicsSpaceConfig::default().with_sub_steps(80);
        assert!(config.validate().is_err());
        assert_eq!(config.sanitized().sub_step_count, MAX_SUB_STEPS);

        let zero = PhysicsSpaceConfig::default().with_sub_steps(0);
        assert_eq!(zero.sanitized().sub_step_count, MIN_SUB_STEPS);
    }

    #[test]
    fn test_toml_round_trip_with_partial_file() {
        let parsed: PhysicsSpaceConfig = toml::from_str("sub_step_count = 4\ndeterministic = true\n")
            .unwrap_or_default();
        assert_eq!(parsed.sub_step_count, 4);
        assert!(parsed.deterministic);
        assert!(parsed.allow_sleep);
        assert_eq!(parsed.solver, SolverConfig::default());
    }

    #[test]
    fn test_ron_save_and_load() {
        let path = std::env::temp_dir().join("physics_core_space_config_test.ron");
        let path = path.to_string_lossy().to_string();
        let config = PhysicsSpaceConfig::default().with_mode_2d(true).with_sub_steps(3);

        assert!(config.save_to_file(&path).is_ok());
        let loaded = PhysicsSpaceConfig::load_from_file(&path);
        let _ = std::fs::remove_file(&path);
        let loaded = loaded.unwrap_or_default();
        assert!(loaded.mode_2d);
        assert_eq!(loaded.sub_step_count, 3);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = PhysicsSpaceConfig::load_from_file("physics.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
        assert_eq!(ConfigFormat::from_path(Path::new("space.ron")).ok(), Some(ConfigFormat::Ron));
    }
}
