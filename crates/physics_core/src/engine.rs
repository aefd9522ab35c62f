//! Physics engine: every space plus the resources they share
//!
//! Collision groups, collision tables and materials are edited through
//! [`PhysicsResources`]. Edits are recorded on per-manager modified lists and
//! pushed to the spaces once per frame by
//! [`PhysicsResources::update_and_notify_if_modified`], right before the
//! spaces step.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::PhysicsSpaceConfig;
use crate::error::{PhysicsError, PhysicsResult};
use crate::foundation::collections::{HandleMap, SpaceHandle};
use crate::physics::collision_group::{CollisionGroup, CollisionGroupId, CollisionTable, DEFAULT_TABLE_NAME};
use crate::physics::material::{MaterialId, PhysicsMaterial, DEFAULT_MATERIAL_NAME};
use crate::physics::PhysicsSpace;

/// Shared collision groups, tables and materials
#[derive(Debug)]
pub struct PhysicsResources {
    groups: HashMap<CollisionGroupId, CollisionGroup>,
    tables: HashMap<String, CollisionTable>,
    materials: HashMap<MaterialId, PhysicsMaterial>,

    removed_groups: Vec<CollisionGroupId>,
    removed_tables: Vec<String>,
    modified_tables: Vec<String>,
    modified_materials: Vec<MaterialId>,
}

impl Default for PhysicsResources {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsResources {
    /// Resources holding only the defaults
    pub fn new() -> Self {
        let group = CollisionGroup::default_group();
        let table = CollisionTable::default();
        let material = PhysicsMaterial::default();
        Self {
            groups: HashMap::from([(group.id(), group)]),
            tables: HashMap::from([(table.name().to_owned(), table)]),
            materials: HashMap::from([(material.id(), material)]),
            removed_groups: Vec::new(),
            removed_tables: Vec::new(),
            modified_tables: Vec::new(),
            modified_materials: Vec::new(),
        }
    }

    // Groups

    /// Register a collision group by name. Registering twice is a no-op.
    pub fn register_group(&mut self, group: CollisionGroup) -> CollisionGroupId {
        let id = group.id();
        if !self.groups.contains_key(&id) {
            info!("Registered collision group '{group}'");
            self.groups.insert(id, group);
        }
        id
    }

    /// Look up a group
    pub fn group(&self, id: CollisionGroupId) -> Option<&CollisionGroup> {
        self.groups.get(&id)
    }

    /// Remove a group from the resources and from every table. Colliders
    /// using it fall back to the default group on the next update.
    pub fn unregister_group(&mut self, id: CollisionGroupId) -> bool {
        if id == CollisionGroup::default_group().id() {
            warn!("The default collision group cannot be unregistered");
            return false;
        }
        let Some(group) = self.groups.remove(&id) else {
            return false;
        };
        info!("Unregistered collision group '{group}'");
        for table in self.tables.values_mut() {
            if table.unregister_group(id) {
                Self::mark(&mut self.modified_tables, table.name().to_owned());
            }
        }
        Self::mark(&mut self.removed_groups, id);
        true
    }

    // Tables

    /// Add or replace a table. Groups it names are registered as well.
    pub fn add_table(&mut self, table: CollisionTable) {
        for group in table.groups() {
            self.groups.entry(group.id()).or_insert_with(|| group.clone());
        }
        let problems = table.validate_filters();
        if !problems.is_empty() {
            warn!("Collision table '{}' has {} invalid filters", table.name(), problems.len());
        }
        let name = table.name().to_owned();
        self.removed_tables.retain(|removed| *removed != name);
        Self::mark(&mut self.modified_tables, name.clone());
        self.tables.insert(name, table);
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Option<&CollisionTable> {
        self.tables.get(name)
    }

    /// Edit a table. Spaces using it pick the edit up on the next update.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut CollisionTable> {
        let table = self.tables.get_mut(name)?;
        Self::mark(&mut self.modified_tables, name.to_owned());
        Some(table)
    }

    /// Tear a table down. Spaces using it switch to the default table on
    /// the next update.
    pub fn remove_table(&mut self, name: &str) -> bool {
        if name == DEFAULT_TABLE_NAME {
            warn!("The default collision table cannot be removed");
            return false;
        }
        if self.tables.remove(name).is_none() {
            return false;
        }
        info!("Removed collision table '{name}'");
        self.modified_tables.retain(|modified| modified != name);
        Self::mark(&mut self.removed_tables, name.to_owned());
        true
    }

    /// The table spaces start with
    pub fn default_table(&self) -> CollisionTable {
        self.tables.get(DEFAULT_TABLE_NAME).cloned().unwrap_or_default()
    }

    // Materials

    /// Add or replace a material
    pub fn add_material(&mut self, mut material: PhysicsMaterial) -> MaterialId {
        material.sanitize();
        let id = material.id();
        self.materials.insert(id, material);
        Self::mark(&mut self.modified_materials, id);
        id
    }

    /// Look up a material by name
    pub fn material(&self, name: &str) -> Option<&PhysicsMaterial> {
        self.materials.get(&MaterialId::from_name(name))
    }

    /// Edit a material. Colliders using it pick the edit up on the next
    /// update.
    pub fn material_mut(&mut self, name: &str) -> Option<&mut PhysicsMaterial> {
        let id = MaterialId::from_name(name);
        let material = self.materials.get_mut(&id)?;
        Self::mark(&mut self.modified_materials, id);
        Some(material)
    }

    /// The material colliders use unless told otherwise
    pub fn default_material(&self) -> PhysicsMaterial {
        self.material(DEFAULT_MATERIAL_NAME).cloned().unwrap_or_default()
    }

    /// Whether any edit is waiting for the next update
    pub fn is_modified(&self) -> bool {
        !(self.removed_groups.is_empty()
            && self.removed_tables.is_empty()
            && self.modified_tables.is_empty()
            && self.modified_materials.is_empty())
    }

    /// Push every recorded edit to the spaces and clear the modified lists
    pub fn update_and_notify_if_modified(&mut self, spaces: &mut HandleMap<SpaceHandle, PhysicsSpace>) {
        if !self.is_modified() {
            return;
        }

        let removed_tables = std::mem::take(&mut self.removed_tables);
        if !removed_tables.is_empty() {
            let fallback = self.default_table();
            for space in spaces.values_mut() {
                if removed_tables.iter().any(|name| name == space.collision_table().name()) {
                    space.set_collision_table(fallback.clone());
                }
            }
        }

        for name in std::mem::take(&mut self.modified_tables) {
            let Some(table) = self.tables.get_mut(&name) else {
                continue;
            };
            table.reconfigure_groups();
            for space in spaces.values_mut() {
                if space.collision_table().name() == name {
                    space.set_collision_table(table.clone());
                }
            }
        }

        // Spaces with private tables still need their cached instances redone
        if !std::mem::take(&mut self.removed_groups).is_empty() {
            for space in spaces.values_mut() {
                space.refresh_group_instances();
            }
        }

        for id in std::mem::take(&mut self.modified_materials) {
            let Some(material) = self.materials.get(&id) else {
                continue;
            };
            let refreshed: usize = spaces.values_mut().map(|space| space.refresh_material(material)).sum();
            debug!("material '{}' refreshed on {refreshed} colliders", material.name);
        }
    }

    fn mark<T: PartialEq>(list: &mut Vec<T>, item: T) {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

/// Owner of every physics space
#[derive(Debug, Default)]
pub struct PhysicsEngine {
    spaces: HandleMap<SpaceHandle, PhysicsSpace>,
    /// Live spaces, oldest first. Slots freed by destroyed spaces get
    /// reused, so the map's own order is not creation order.
    order: Vec<SpaceHandle>,
    resources: PhysicsResources,
}

impl PhysicsEngine {
    /// Engine with no spaces and the default resources
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a space using the default collision table
    pub fn create_space(&mut self, config: PhysicsSpaceConfig) -> SpaceHandle {
        let mut space = PhysicsSpace::new(config);
        space.set_collision_table(self.resources.default_table());
        let handle = self.spaces.insert(space);
        self.order.push(handle);
        info!("Physics engine now runs {} spaces", self.spaces.len());
        handle
    }

    /// Destroy a space and everything in it
    pub fn destroy_space(&mut self, handle: SpaceHandle) -> PhysicsResult<PhysicsSpace> {
        let space = self.spaces.remove(handle).ok_or(PhysicsError::InvalidHandle("space"))?;
        self.order.retain(|&h| h != handle);
        Ok(space)
    }

    /// Look up a space
    pub fn space(&self, handle: SpaceHandle) -> Option<&PhysicsSpace> {
        self.spaces.get(handle)
    }

    /// Look up a space for editing
    pub fn space_mut(&mut self, handle: SpaceHandle) -> Option<&mut PhysicsSpace> {
        self.spaces.get_mut(handle)
    }

    /// Every space in creation order
    pub fn spaces(&self) -> impl Iterator<Item = (SpaceHandle, &PhysicsSpace)> {
        self.order.iter().filter_map(|&handle| self.spaces.get(handle).map(|space| (handle, space)))
    }

    /// Shared resources
    pub const fn resources(&self) -> &PhysicsResources {
        &self.resources
    }

    /// Shared resources for editing
    pub fn resources_mut(&mut self) -> &mut PhysicsResources {
        &mut self.resources
    }

    /// Point a space at one of the shared tables
    pub fn assign_collision_table(&mut self, space: SpaceHandle, table: &str) -> PhysicsResult<()> {
        let table = self
            .resources
            .table(table)
            .cloned()
            .ok_or(PhysicsError::InvalidHandle("collision table"))?;
        let space = self.spaces.get_mut(space).ok_or(PhysicsError::InvalidHandle("space"))?;
        space.set_collision_table(table);
        Ok(())
    }

    /// Reconcile resource edits, then advance every space by `dt` in
    /// creation order
    pub fn update(&mut self, dt: f32) {
        self.resources.update_and_notify_if_modified(&mut self.spaces);
        for &handle in &self.order {
            if let Some(space) = self.spaces.get_mut(handle) {
                space.update(dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::physics::body::RigidBodyDesc;
    use crate::physics::collider::ColliderDesc;
    use crate::physics::collision_group::{CollisionFilter, FilterFlags};
    use crate::physics::shape::Shape;
    use approx::assert_relative_eq;

    fn gameplay_table(player: &CollisionGroup, pickup: &CollisionGroup) -> CollisionTable {
        let mut table = CollisionTable::new("Gameplay");
        assert!(table.register_group(player).is_ok());
        assert!(table.register_group(pickup).is_ok());
        assert!(table.add_filter(CollisionFilter::new(player, pickup, FilterFlags::SKIP_RESOLUTION)).is_ok());
        table
    }

    #[test]
    fn test_update_steps_every_space() {
        let mut engine = PhysicsEngine::new();
        let first = engine.create_space(PhysicsSpaceConfig::default());
        let second = engine.create_space(PhysicsSpaceConfig::default().with_gravity(Vec3::zeros()));

        let mut bodies = Vec::new();
        for handle in [first, second] {
            let space = engine.space_mut(handle).unwrap();
            let node = space.create_node(None, Transform::identity()).unwrap();
            assert!(space.add_collider(node, ColliderDesc::new(Shape::sphere(0.5))).is_ok());
            let body = space.add_rigid_body(node, &RigidBodyDesc::dynamic()).unwrap();
            bodies.push(body);
        }

        engine.update(0.1);
        let falling = engine.space(first).and_then(|s| s.body(bodies[0])).map(|b| b.velocity()).unwrap();
        let floating = engine.space(second).and_then(|s| s.body(bodies[1])).map(|b| b.velocity()).unwrap();
        assert_relative_eq!(falling.y, -1.0, epsilon = 1.0e-4);
        assert_relative_eq!(floating.norm(), 0.0);
    }

    #[test]
    fn test_table_edits_reach_spaces_on_update() {
        let mut engine = PhysicsEngine::new();
        let space = engine.create_space(PhysicsSpaceConfig::default());
        let player = CollisionGroup::new("Player");
        let pickup = CollisionGroup::new("Pickup");
        engine.resources_mut().add_table(gameplay_table(&player, &pickup));
        assert!(engine.assign_collision_table(space, "Gameplay").is_ok());
        assert!(engine.resources().group(player.id()).is_some());

        if let Some(table) = engine.resources_mut().table_mut("Gameplay") {
            assert!(table.remove_filter(player.id(), pickup.id()).is_some());
        }
        assert!(engine.space(space).is_some_and(|s| s.collision_table().filters().len() == 1));
        engine.update(1.0 / 60.0);
        assert!(engine.space(space).is_some_and(|s| s.collision_table().filters().is_empty()));
        assert!(!engine.resources().is_modified());
    }

    #[test]
    fn test_removing_a_table_falls_back_to_the_default() {
        let mut engine = PhysicsEngine::new();
        let space = engine.create_space(PhysicsSpaceConfig::default());
        let player = CollisionGroup::new("Player");
        let pickup = CollisionGroup::new("Pickup");
        engine.resources_mut().add_table(gameplay_table(&player, &pickup));
        assert!(engine.assign_collision_table(space, "Gameplay").is_ok());

        assert!(!engine.resources_mut().remove_table(DEFAULT_TABLE_NAME));
        assert!(engine.resources_mut().remove_table("Gameplay"));
        engine.update(1.0 / 60.0);
        assert!(engine.space(space).is_some_and(|s| s.collision_table().name() == DEFAULT_TABLE_NAME));
        assert!(engine.assign_collision_table(space, "Gameplay").is_err());
    }

    #[test]
    fn test_unregistered_group_leaves_every_table() {
        let mut engine = PhysicsEngine::new();
        let space = engine.create_space(PhysicsSpaceConfig::default());
        let player = CollisionGroup::new("Player");
        let pickup = CollisionGroup::new("Pickup");
        engine.resources_mut().add_table(gameplay_table(&player, &pickup));
        assert!(engine.assign_collision_table(space, "Gameplay").is_ok());

        assert!(engine.resources_mut().unregister_group(pickup.id()));
        assert!(!engine.resources_mut().unregister_group(CollisionGroup::default_group().id()));
        engine.update(1.0 / 60.0);
        let table = engine.space(space).map(PhysicsSpace::collision_table).unwrap();
        assert!(!table.is_registered(pickup.id()));
        assert!(table.filters().is_empty());
    }

    #[test]
    fn test_unregistered_group_re_resolves_live_colliders() {
        let mut engine = PhysicsEngine::new();
        let handle = engine.create_space(PhysicsSpaceConfig::default());
        let pickup = CollisionGroup::new("Pickup");
        let player = CollisionGroup::new("Player");
        let mut table = CollisionTable::new("Arena");
        table.register_group(&pickup).unwrap();
        table.register_group(&player).unwrap();
        table.add_filter(CollisionFilter::new(&player, &pickup, FilterFlags::SKIP_RESOLUTION)).unwrap();
        engine.resources_mut().add_table(table);
        engine.assign_collision_table(handle, "Arena").unwrap();

        let space = engine.space_mut(handle).unwrap();
        let node = space.create_node(None, Transform::identity()).unwrap();
        let collider = space.add_collider(node, ColliderDesc::new(Shape::sphere(1.0)).with_group(player.clone())).unwrap();
        let before = *space.collider(collider).unwrap().group_instance();
        assert_eq!(before.group_bit, 1 << 2);
        assert_eq!(before.resolution_mask & (1 << 1), 0);

        engine.resources_mut().unregister_group(pickup.id());
        engine.update(1.0 / 60.0);

        let space = engine.space(handle).unwrap();
        let after = *space.collider(collider).unwrap().group_instance();
        assert_eq!(after.group_bit, 1 << 1);
        assert_eq!(after.detection_mask, u32::MAX);
        assert_eq!(after.resolution_mask, u32::MAX);
        assert_eq!(after, space.collision_table().group_instance(player.id()));
    }

    #[test]
    fn test_group_cap_survives_table_swaps() {
        let mut engine = PhysicsEngine::new();
        let handle = engine.create_space(PhysicsSpaceConfig::default().with_max_collision_groups(4));
        let player = CollisionGroup::new("Player");
        let pickup = CollisionGroup::new("Pickup");
        engine.resources_mut().add_table(gameplay_table(&player, &pickup));
        let cap = |engine: &PhysicsEngine| engine.space(handle).unwrap().collision_table().max_groups();
        assert_eq!(cap(&engine), 4);

        engine.assign_collision_table(handle, "Gameplay").unwrap();
        assert_eq!(cap(&engine), 4);

        engine.resources_mut().table_mut("Gameplay").unwrap().remove_filter(player.id(), pickup.id());
        engine.update(1.0 / 60.0);
        assert_eq!(cap(&engine), 4);

        engine.resources_mut().remove_table("Gameplay");
        engine.update(1.0 / 60.0);
        assert_eq!(engine.space(handle).unwrap().collision_table().name(), DEFAULT_TABLE_NAME);
        assert_eq!(cap(&engine), 4);
    }

    #[test]
    fn test_spaces_keep_creation_order_when_slots_are_reused() {
        let mut engine = PhysicsEngine::new();
        let first = engine.create_space(PhysicsSpaceConfig::default());
        let second = engine.create_space(PhysicsSpaceConfig::default());
        engine.destroy_space(first).unwrap();
        let third = engine.create_space(PhysicsSpaceConfig::default());

        let order: Vec<SpaceHandle> = engine.spaces().map(|(handle, _)| handle).collect();
        assert_eq!(order, vec![second, third]);
        assert!(engine.destroy_space(first).is_err());
    }

    #[test]
    fn test_material_density_reaches_colliders_on_update() {
        let mut engine = PhysicsEngine::new();
        let handle = engine.create_space(PhysicsSpaceConfig::default());
        engine.resources_mut().add_material(PhysicsMaterial::new("Rubber").with_density(2.0));
        let rubber = engine.resources().material("Rubber").cloned().unwrap();

        let space = engine.space_mut(handle).unwrap();
        let node = space.create_node(None, Transform::identity()).unwrap();
        let collider = space.add_collider(node, ColliderDesc::new(Shape::sphere(1.0)).with_material(rubber)).unwrap();

        if let Some(material) = engine.resources_mut().material_mut("Rubber") {
            material.density = 0.0;
        }
        assert!(engine.space(handle).and_then(|s| s.collider(collider)).is_some_and(|c| !c.is_massless()));
        engine.update(1.0 / 60.0);
        assert!(engine.space(handle).and_then(|s| s.collider(collider)).is_some_and(|c| c.is_massless()));
    }
}


