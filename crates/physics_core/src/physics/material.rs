//! Physics materials
//!
//! Density, restitution and friction shared by any number of colliders.
//! Colliders keep a copy; edits made through the engine's resource
//! manager reach them during the once-per-frame reconciliation.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::foundation::collections::name_hash;

/// Name of the material colliders use unless told otherwise
pub const DEFAULT_MATERIAL_NAME: &str = "DefaultPhysicsMaterial";

/// Stable identifier of a material, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u64);

impl MaterialId {
    /// Id for a material name
    pub fn from_name(name: &str) -> Self {
        Self(name_hash(name))
    }
}

/// Surface and mass properties of a collider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsMaterial {
    /// Resource name
    pub name: String,
    /// Mass per unit volume; zero makes the collider massless
    pub density: f32,
    /// Bounciness in [0, 1]
    pub restitution: f32,
    /// Coulomb friction coefficient
    pub friction: f32,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            name: DEFAULT_MATERIAL_NAME.to_string(),
            density: 1.0,
            restitution: 0.0,
            friction: 0.5,
        }
    }
}

impl Config for PhysicsMaterial {}

impl PhysicsMaterial {
    /// Default properties under a new name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Set density (negative values clamp to zero with a warning)
    #[must_use]
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self.sanitize();
        self
    }

    /// Set restitution
    #[must_use]
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self.sanitize();
        self
    }

    /// Set friction
    #[must_use]
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self.sanitize();
        self
    }

    /// Resource id
    pub fn id(&self) -> MaterialId {
        MaterialId::from_name(&self.name)
    }

    /// Whether colliders using this material add no mass
    pub fn is_massless(&self) -> bool {
        self.density == 0.0
    }

    /// Clamp out-of-range values in place, warning for each
    pub fn sanitize(&mut self) {
        if !(self.density >= 0.0) {
            warn!("Material '{}' density {} is invalid and was set to 0", self.name, self.density);
            self.density = 0.0;
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            warn!("Material '{}' restitution {} clamped to [0, 1]", self.name, self.restitution);
            self.restitution = if self.restitution.is_nan() { 0.0 } else { self.restitution.clamp(0.0, 1.0) };
        }
        if !(self.friction >= 0.0) {
            warn!("Material '{}' friction {} clamped to 0", self.name, self.friction);
            self.friction = 0.0;
        }
    }

    /// Combined restitution of two touching materials
    pub fn combined_restitution(&self, other: &Self) -> f32 {
        self.restitution.max(other.restitution)
    }

    /// Combined friction of two touching materials
    pub fn combined_friction(&self, other: &Self) -> f32 {
        (self.friction * other.friction).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invalid_values_are_clamped() {
        let material = PhysicsMaterial::new("Bad")
            .with_density(-3.0)
            .with_restitution(4.0)
            .with_friction(-1.0);
        assert_eq!(material.density, 0.0);
        assert!(material.is_massless());
        assert_eq!(material.restitution, 1.0);
        assert_eq!(material.friction, 0.0);
    }

    #[test]
    fn test_combination_rules() {
        let a = PhysicsMaterial::new("A").with_friction(0.25).with_restitution(0.2);
        let b = PhysicsMaterial::new("B").with_friction(1.0).with_restitution(0.6);
        assert_relative_eq!(a.combined_friction(&b), 0.5);
        assert_relative_eq!(a.combined_restitution(&b), 0.6);
    }

    #[test]
    fn test_toml_material() {
        let parsed: PhysicsMaterial = toml::from_str("name = \"Ice\"\nfriction = 0.02\n").unwrap_or_default();
        assert_eq!(parsed.name, "Ice");
        assert_relative_eq!(parsed.friction, 0.02);
        assert_relative_eq!(parsed.density, 1.0);
        assert_eq!(parsed.id(), MaterialId::from_name("Ice"));
    }
}
