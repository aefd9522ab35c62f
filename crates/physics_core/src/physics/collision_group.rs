//! # Collision Groups and Tables
//!
//! A [`CollisionTable`] maps every registered [`CollisionGroup`] to a
//! compact [`CollisionGroupInstance`] holding one bit for the group and two
//! masks. Two colliders are tested only when each one's bit is set in the
//! other's detection mask, and resolved only when the same holds for the
//! resolution masks. [`CollisionFilter`]s between pairs of groups clear
//! those bits and request group-level events.
//!
//! ## Usage
//!
//! ```rust
//! use physics_core::physics::collision_group::*;
//!
//! let player = CollisionGroup::new("Player");
//! let pickup = CollisionGroup::new("Pickup");
//!
//! let mut table = CollisionTable::new("Gameplay");
//! table.register_group(&player).unwrap();
//! table.register_group(&pickup).unwrap();
//! table.add_filter(CollisionFilter::new(&player, &pickup, FilterFlags::SKIP_RESOLUTION)).unwrap();
//!
//! let a = table.group_instance(player.id());
//! let b = table.group_instance(pickup.id());
//! assert!(!a.skip_detection(&b));
//! assert!(a.skip_resolution(&b));
//! ```

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PhysicsError, PhysicsResult};
use crate::foundation::collections::name_hash;

/// Name of the group every table registers first
pub const DEFAULT_GROUP_NAME: &str = "DefaultGroup";

/// Name of the table spaces use until told otherwise
pub const DEFAULT_TABLE_NAME: &str = "DefaultCollisionTable";

/// Groups a table holds unless configured otherwise
pub const DEFAULT_MAX_GROUPS: usize = 31;

/// Stable identifier of a collision group, derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollisionGroupId(u64);

impl CollisionGroupId {
    /// FNV-1a hash of the group name
    pub fn from_name(name: &str) -> Self {
        Self(name_hash(name))
    }

    /// Raw value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A named collision group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CollisionGroup {
    name: String,
    id: CollisionGroupId,
}

impl CollisionGroup {
    /// Group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = CollisionGroupId::from_name(&name);
        Self { name, id }
    }

    /// The group every collider starts in
    pub fn default_group() -> Self {
        Self::new(DEFAULT_GROUP_NAME)
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group id
    pub const fn id(&self) -> CollisionGroupId {
        self.id
    }
}

impl Default for CollisionGroup {
    fn default() -> Self {
        Self::default_group()
    }
}

impl From<String> for CollisionGroup {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<CollisionGroup> for String {
    fn from(group: CollisionGroup) -> Self {
        group.name
    }
}

impl fmt::Display for CollisionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A group's bit and masks inside one table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionGroupInstance {
    /// The group this instance was made for
    pub group: CollisionGroupId,
    /// Single bit identifying the group inside its table
    pub group_bit: u32,
    /// Groups this one is tested against
    pub detection_mask: u32,
    /// Groups this one is resolved against
    pub resolution_mask: u32,
}

impl CollisionGroupInstance {
    /// Instance that detects and resolves against everything
    pub const fn permissive(group: CollisionGroupId) -> Self {
        Self {
            group,
            group_bit: 1,
            detection_mask: u32::MAX,
            resolution_mask: u32::MAX,
        }
    }

    /// Whether the pair must not even be tested
    pub const fn skip_detection(&self, other: &Self) -> bool {
        (self.group_bit & other.detection_mask) == 0 || (other.group_bit & self.detection_mask) == 0
    }

    /// Whether the pair is tested but never pushed apart
    pub const fn skip_resolution(&self, other: &Self) -> bool {
        (self.group_bit & other.resolution_mask) == 0 || (other.group_bit & self.resolution_mask) == 0
    }
}

bitflags! {
    /// Behaviour of a pair of groups
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FilterFlags: u32 {
        /// Never test the pair
        const SKIP_DETECTION = 1 << 0;
        /// Test the pair but never resolve it
        const SKIP_RESOLUTION = 1 << 1;
        /// Send a group event when the pair starts touching
        const START_EVENT = 1 << 2;
        /// Send a group event when the pair stops touching
        const END_EVENT = 1 << 3;
        /// Send a group event before the solver runs
        const PRE_SOLVE_EVENT = 1 << 4;
        /// Route group events to the first group's colliders
        const SEND_EVENTS_TO_A = 1 << 5;
        /// Route group events to the second group's colliders
        const SEND_EVENTS_TO_B = 1 << 6;
        /// Route group events to the space
        const SEND_EVENTS_TO_SPACE = 1 << 7;
    }
}

/// Pairwise rule between two groups. The pair is stored ordered by id so
/// `(A, B)` and `(B, A)` name the same filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    groups: [CollisionGroup; 2],
    flags: FilterFlags,
}

impl CollisionFilter {
    /// Filter between two groups
    pub fn new(a: &CollisionGroup, b: &CollisionGroup, flags: FilterFlags) -> Self {
        let groups = if a.id() <= b.id() { [a.clone(), b.clone()] } else { [b.clone(), a.clone()] };
        Self { groups, flags }
    }

    /// The two groups, ordered by id
    pub const fn groups(&self) -> &[CollisionGroup; 2] {
        &self.groups
    }

    /// Ordered id pair used as the lookup key
    pub fn key(&self) -> (CollisionGroupId, CollisionGroupId) {
        (self.groups[0].id(), self.groups[1].id())
    }

    /// Behaviour flags
    pub const fn flags(&self) -> FilterFlags {
        self.flags
    }

    /// Replace the behaviour flags
    pub fn set_flags(&mut self, flags: FilterFlags) {
        self.flags = flags;
    }

    /// Whether any group event is requested
    pub const fn wants_events(&self) -> bool {
        self.flags.intersects(
            FilterFlags::START_EVENT.union(FilterFlags::END_EVENT).union(FilterFlags::PRE_SOLVE_EVENT),
        )
    }
}

fn ordered(a: CollisionGroupId, b: CollisionGroupId) -> (CollisionGroupId, CollisionGroupId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Registered groups, their instances and the filters between them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CollisionTableFile", into = "CollisionTableFile")]
pub struct CollisionTable {
    name: String,
    auto_register: bool,
    max_groups: usize,
    groups: Vec<CollisionGroup>,
    instances: HashMap<CollisionGroupId, CollisionGroupInstance>,
    filters: Vec<CollisionFilter>,
    hashed_filters: HashMap<(CollisionGroupId, CollisionGroupId), usize>,
}

impl Default for CollisionTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_NAME)
    }
}

impl CollisionTable {
    /// Table holding only the default group
    pub fn new(name: impl Into<String>) -> Self {
        let mut table = Self {
            name: name.into(),
            auto_register: false,
            max_groups: DEFAULT_MAX_GROUPS,
            groups: Vec::new(),
            instances: HashMap::new(),
            filters: Vec::new(),
            hashed_filters: HashMap::new(),
        };
        table.set_defaults();
        table
    }

    /// Builder-style group cap (at most 32, the width of the masks)
    #[must_use]
    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups.clamp(1, 32);
        self
    }

    /// Builder-style auto registration of unknown groups used by filters
    #[must_use]
    pub const fn with_auto_register(mut self, auto_register: bool) -> Self {
        self.auto_register = auto_register;
        self
    }

    fn set_defaults(&mut self) {
        let group = CollisionGroup::default_group();
        self.instances.insert(group.id(), CollisionGroupInstance::permissive(group.id()));
        self.groups.push(group);
        self.reconfigure_groups();
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of registered groups
    pub const fn max_groups(&self) -> usize {
        self.max_groups
    }

    /// Whether unknown groups are registered on first use
    pub const fn auto_register(&self) -> bool {
        self.auto_register
    }

    /// Registered groups in registration order
    pub fn groups(&self) -> &[CollisionGroup] {
        &self.groups
    }

    /// Filters in insertion order
    pub fn filters(&self) -> &[CollisionFilter] {
        &self.filters
    }

    /// Whether a group is registered
    pub fn is_registered(&self, group: CollisionGroupId) -> bool {
        self.instances.contains_key(&group)
    }

    /// Register a group. Registering twice is a no-op.
    pub fn register_group(&mut self, group: &CollisionGroup) -> PhysicsResult<()> {
        if self.is_registered(group.id()) {
            return Ok(());
        }
        if self.groups.len() >= self.max_groups {
            warn!(
                "Can only register {} collision groups per table; '{}' was not added to '{}'",
                self.max_groups, group, self.name
            );
            return Err(PhysicsError::GroupTableFull { capacity: self.max_groups });
        }

        self.instances.insert(group.id(), CollisionGroupInstance::permissive(group.id()));
        self.groups.push(group.clone());
        self.reconfigure_groups();
        Ok(())
    }

    /// Remove a group, every filter that mentions it, and rebuild the masks.
    /// Colliders still naming the group fall back to the default instance.
    pub fn unregister_group(&mut self, group: CollisionGroupId) -> bool {
        if group == CollisionGroup::default_group().id() {
            warn!("The default collision group cannot be removed from '{}'", self.name);
            return false;
        }
        self.remove_group_instance_and_filters(group)
    }

    fn remove_group_instance_and_filters(&mut self, group: CollisionGroupId) -> bool {
        if self.instances.remove(&group).is_none() {
            return false;
        }
        self.groups.retain(|g| g.id() != group);
        self.filters.retain(|f| f.groups[0].id() != group && f.groups[1].id() != group);
        self.reconfigure_groups();
        true
    }

    /// Add or replace the filter for a pair of groups
    pub fn add_filter(&mut self, filter: CollisionFilter) -> PhysicsResult<()> {
        for group in filter.groups() {
            if self.is_registered(group.id()) {
                continue;
            }
            if self.auto_register {
                self.register_group(group)?;
            } else {
                warn!("Filter [{}, {}] names unregistered group '{}'", filter.groups[0], filter.groups[1], group);
                return Err(PhysicsError::MissingGroupInstance(group.name().to_string()));
            }
        }

        match self.hashed_filters.get(&filter.key()) {
            Some(&index) => self.filters[index] = filter,
            None => self.filters.push(filter),
        }
        self.reconfigure_groups();
        Ok(())
    }

    /// Remove the filter between two groups
    pub fn remove_filter(&mut self, a: CollisionGroupId, b: CollisionGroupId) -> Option<CollisionFilter> {
        let index = *self.hashed_filters.get(&ordered(a, b))?;
        let filter = self.filters.remove(index);
        self.reconfigure_groups();
        Some(filter)
    }

    /// Filter between two groups, in either order
    pub fn find_filter(&self, a: CollisionGroupId, b: CollisionGroupId) -> Option<&CollisionFilter> {
        self.hashed_filters.get(&ordered(a, b)).map(|&index| &self.filters[index])
    }

    /// Instance of a group, falling back to the default group's instance
    pub fn group_instance(&self, group: CollisionGroupId) -> CollisionGroupInstance {
        self.try_group_instance(group)
            .or_else(|| self.try_group_instance(CollisionGroup::default_group().id()))
            .unwrap_or_else(|| CollisionGroupInstance::permissive(group))
    }

    /// Instance of a group, or `None` when it is not registered
    pub fn try_group_instance(&self, group: CollisionGroupId) -> Option<CollisionGroupInstance> {
        self.instances.get(&group).copied()
    }

    /// Reassign group bits in registration order and rebuild every mask
    /// from the filters. Running it twice gives the same result.
    pub fn reconfigure_groups(&mut self) {
        for (index, group) in self.groups.iter().enumerate() {
            if let Some(instance) = self.instances.get_mut(&group.id()) {
                instance.group_bit = 1 << index;
                instance.detection_mask = u32::MAX;
                instance.resolution_mask = u32::MAX;
            }
        }

        for filter in &self.filters {
            let (a, b) = filter.key();
            let (Some(bit_a), Some(bit_b)) = (
                self.instances.get(&a).map(|i| i.group_bit),
                self.instances.get(&b).map(|i| i.group_bit),
            ) else {
                continue;
            };

            let skip_detection = filter.flags.contains(FilterFlags::SKIP_DETECTION);
            let skip_resolution = filter.flags.contains(FilterFlags::SKIP_RESOLUTION);
            for (this, other_bit) in [(a, bit_b), (b, bit_a)] {
                if let Some(instance) = self.instances.get_mut(&this) {
                    if skip_detection {
                        instance.detection_mask &= !other_bit;
                    } else {
                        instance.detection_mask |= other_bit;
                    }
                    if skip_resolution {
                        instance.resolution_mask &= !other_bit;
                    } else {
                        instance.resolution_mask |= other_bit;
                    }
                }
            }
        }

        self.hashed_filters = self
            .filters
            .iter()
            .enumerate()
            .map(|(index, filter)| (filter.key(), index))
            .collect();
    }

    /// Log every filter that names an unregistered group and return the
    /// messages
    pub fn validate_filters(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for filter in &self.filters {
            let [a, b] = &filter.groups;
            for group in [a, b] {
                if !self.is_registered(group.id()) {
                    let message = format!("Resource group {group} from pair [{a},{b}] was not registered.");
                    error!("{message}");
                    problems.push(message);
                }
            }
        }
        problems
    }

    /// Copy groups and filters into `destination`, keeping its name
    pub fn copy_to(&self, destination: &mut Self) {
        destination.auto_register = self.auto_register;
        destination.max_groups = self.max_groups;
        destination.groups = self.groups.clone();
        destination.instances = self.instances.clone();
        destination.filters = self.filters.clone();
        destination.reconfigure_groups();
    }

    /// Independent copy under a new name
    #[must_use]
    pub fn runtime_clone(&self, name: impl Into<String>) -> Self {
        let mut table = Self::new(name);
        self.copy_to(&mut table);
        table
    }

    /// Drop every group and filter, leaving only the default group
    pub fn clear(&mut self) {
        self.groups.clear();
        self.instances.clear();
        self.filters.clear();
        self.set_defaults();
    }
}

/// On-disk form of a table: instances are rebuilt on load
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollisionTableFile {
    name: String,
    #[serde(default)]
    auto_register: bool,
    #[serde(default = "default_max_groups")]
    max_groups: usize,
    #[serde(default)]
    groups: Vec<CollisionGroup>,
    #[serde(default)]
    filters: Vec<CollisionFilter>,
}

const fn default_max_groups() -> usize {
    DEFAULT_MAX_GROUPS
}

impl From<CollisionTableFile> for CollisionTable {
    fn from(file: CollisionTableFile) -> Self {
        let mut table = Self::new(file.name).with_max_groups(file.max_groups);
        table.auto_register = file.auto_register;
        for group in &file.groups {
            // Full tables already warned
            let _ = table.register_group(group);
        }
        // Keep unregistered filters so validate_filters can report them
        table.filters = file.filters;
        table.validate_filters();
        table.reconfigure_groups();
        table
    }
}

impl From<CollisionTable> for CollisionTableFile {
    fn from(table: CollisionTable) -> Self {
        Self {
            name: table.name,
            auto_register: table.auto_register,
            max_groups: table.max_groups,
            groups: table.groups,
            filters: table.filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(groups: &[&CollisionGroup]) -> CollisionTable {
        let mut table = CollisionTable::new("Test");
        for group in groups {
            assert!(table.register_group(group).is_ok());
        }
        table
    }

    #[test]
    fn test_default_group_collides_with_itself() {
        let table = CollisionTable::default();
        let default = table.group_instance(CollisionGroup::default_group().id());
        assert_eq!(default.group_bit, 1);
        assert!(!default.skip_detection(&default));
        assert!(!default.skip_resolution(&default));
    }

    #[test]
    fn test_skip_detection_filter() {
        let a = CollisionGroup::new("A");
        let b = CollisionGroup::new("B");
        let mut table = table_with(&[&a, &b]);
        assert!(table.add_filter(CollisionFilter::new(&a, &b, FilterFlags::SKIP_DETECTION)).is_ok());

        let ia = table.group_instance(a.id());
        let ib = table.group_instance(b.id());
        assert!(ia.skip_detection(&ib));
        assert!(ib.skip_detection(&ia));
        assert!(!ia.skip_detection(&ia));
        assert!(!ia.skip_resolution(&ib));
    }

    #[test]
    fn test_reconfigure_is_idempotent() {
        let a = CollisionGroup::new("A");
        let b = CollisionGroup::new("B");
        let mut table = table_with(&[&a, &b]);
        assert!(table.add_filter(CollisionFilter::new(&b, &a, FilterFlags::SKIP_RESOLUTION)).is_ok());

        let before: Vec<_> = [a.id(), b.id()].iter().map(|&id| table.group_instance(id)).collect();
        table.reconfigure_groups();
        table.reconfigure_groups();
        let after: Vec<_> = [a.id(), b.id()].iter().map(|&id| table.group_instance(id)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_unknown_group_falls_back_to_default() {
        let table = CollisionTable::default();
        let unknown = CollisionGroup::new("Nope");
        assert!(table.try_group_instance(unknown.id()).is_none());
        assert_eq!(
            table.group_instance(unknown.id()),
            table.group_instance(CollisionGroup::default_group().id())
        );
    }

    #[test]
    fn test_group_cap() {
        let mut table = CollisionTable::new("Small").with_max_groups(2);
        assert!(table.register_group(&CollisionGroup::new("One")).is_ok());
        assert_eq!(
            table.register_group(&CollisionGroup::new("Two")),
            Err(PhysicsError::GroupTableFull { capacity: 2 })
        );
    }

    #[test]
    fn test_unregister_removes_filters_and_repacks_bits() {
        let a = CollisionGroup::new("A");
        let b = CollisionGroup::new("B");
        let mut table = table_with(&[&a, &b]);
        assert!(table.add_filter(CollisionFilter::new(&a, &b, FilterFlags::SKIP_DETECTION)).is_ok());

        assert!(table.unregister_group(a.id()));
        assert!(table.filters().is_empty());
        assert_eq!(table.group_instance(b.id()).group_bit, 1 << 1);
        assert!(!table.unregister_group(CollisionGroup::default_group().id()));
    }

    #[test]
    fn test_filter_requires_registration_unless_auto() {
        let a = CollisionGroup::new("A");
        let b = CollisionGroup::new("B");
        let mut strict = CollisionTable::new("Strict");
        assert!(strict.add_filter(CollisionFilter::new(&a, &b, FilterFlags::SKIP_DETECTION)).is_err());

        let mut auto = CollisionTable::new("Auto").with_auto_register(true);
        assert!(auto.add_filter(CollisionFilter::new(&a, &b, FilterFlags::SKIP_DETECTION)).is_ok());
        assert!(auto.is_registered(a.id()) && auto.is_registered(b.id()));
    }

    #[test]
    fn test_ron_round_trip_rebuilds_instances() {
        let a = CollisionGroup::new("A");
        let b = CollisionGroup::new("B");
        let mut table = table_with(&[&a, &b]);
        assert!(table.add_filter(CollisionFilter::new(&a, &b, FilterFlags::SKIP_DETECTION | FilterFlags::START_EVENT)).is_ok());

        let text = ron::to_string(&table).unwrap_or_default();
        let loaded: Result<CollisionTable, _> = ron::from_str(&text);
        assert!(loaded.is_ok());
        if let Ok(loaded) = loaded {
            assert_eq!(loaded.name(), "Test");
            assert!(loaded.group_instance(a.id()).skip_detection(&loaded.group_instance(b.id())));
            assert!(loaded.find_filter(b.id(), a.id()).is_some_and(CollisionFilter::wants_events));
        }
    }

    #[test]
    fn test_clear_and_copy() {
        let a = CollisionGroup::new("A");
        let mut table = table_with(&[&a]);
        let copy = table.runtime_clone("Copy");
        assert!(copy.is_registered(a.id()));
        assert_eq!(copy.name(), "Copy");

        table.clear();
        assert_eq!(table.groups().len(), 1);
        assert!(!table.is_registered(a.id()));
    }
}
