//! # Asset Library
//!
//! Narrow interface to the host's asset database. The sync engine only needs
//! two things from it: instantiate an asset by path when a peer references
//! one, and check that a material name resolves before assigning it.

use std::collections::{HashMap, HashSet};

use crate::scene::{Entity, EntitySource};

/// Host-provided asset resolution
pub trait AssetLibrary: Send {
    /// Build a fresh entity for the asset at `path`, or `None` if this peer
    /// does not have it
    fn instantiate(&self, path: &str) -> Option<Entity>;

    /// Whether a material with this name exists locally
    fn has_material(&self, name: &str) -> bool;
}

/// In-memory asset library, for headless peers and tests
#[derive(Debug, Default, Clone)]
pub struct MemoryAssetLibrary {
    prefabs: HashMap<String, Entity>,
    materials: HashSet<String>,
    any_material: bool,
}

impl MemoryAssetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library that accepts every material name
    pub fn permissive() -> Self {
        Self {
            any_material: true,
            ..Self::default()
        }
    }

    /// Register a prefab; instantiating it yields a copy of `template`
    pub fn with_prefab(mut self, path: impl Into<String>, template: Entity) -> Self {
        let path = path.into();
        let mut template = template;
        template.source = EntitySource::Asset(path.clone());
        self.prefabs.insert(path, template);
        self
    }

    pub fn with_material(mut self, name: impl Into<String>) -> Self {
        self.materials.insert(name.into());
        self
    }
}

impl AssetLibrary for MemoryAssetLibrary {
    fn instantiate(&self, path: &str) -> Option<Entity> {
        let mut entity = self.prefabs.get(path)?.clone();
        entity.unique_id = None;
        entity.stored_handle = None;
        entity.unsynced = false;
        Some(entity)
    }

    fn has_material(&self, name: &str) -> bool {
        self.any_material || self.materials.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_shared::PrimitiveShape;

    #[test]
    fn prefab_instances_are_tagged_with_their_path() {
        let library = MemoryAssetLibrary::new()
            .with_prefab("Props/Crate", Entity::primitive("Crate", PrimitiveShape::Cube).with_unique_id("tpl"));
        let entity = library.instantiate("Props/Crate").unwrap();
        assert_eq!(entity.source, EntitySource::Asset("Props/Crate".to_string()));
        assert!(entity.unique_id.is_none());
        assert!(library.instantiate("Props/Barrel").is_none());
    }

    #[test]
    fn materials_resolve_by_name() {
        let library = MemoryAssetLibrary::new().with_material("Brick");
        assert!(library.has_material("Brick"));
        assert!(!library.has_material("Glass"));
        assert!(MemoryAssetLibrary::permissive().has_material("Glass"));
    }
}
