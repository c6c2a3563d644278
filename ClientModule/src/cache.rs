//! # Last-Known State Cache
//!
//! Per-peer memory of the last value sent or applied for each replicated
//! field. Never transmitted. The change monitor compares against it to
//! decide what is worth sending, and the apply engine writes to it so a
//! value just received is not sent straight back.

use std::collections::HashMap;

use collab_shared::{Rotator, Vector3};

use crate::scene::{Entity, UniqueId};

/// Last-known values of one entity; `None` means "not observed yet"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSnapshot {
    pub position: Option<Vector3>,
    pub rotation: Option<Rotator>,
    pub scale: Option<Vector3>,
    pub material: Option<String>,
}

impl FieldSnapshot {
    /// Snapshot holding every field of `entity`
    pub fn of(entity: &Entity) -> Self {
        Self {
            position: Some(entity.position),
            rotation: Some(entity.rotation),
            scale: Some(entity.scale),
            material: entity.material.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LastKnownCache {
    entries: HashMap<UniqueId, FieldSnapshot>,
}

impl LastKnownCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &UniqueId) -> Option<&FieldSnapshot> {
        self.entries.get(id)
    }

    /// Snapshot for `id`, created empty if absent
    pub fn entry(&mut self, id: &UniqueId) -> &mut FieldSnapshot {
        self.entries.entry(id.clone()).or_default()
    }

    /// Overwrite every field with the entity's current state
    pub fn record_entity(&mut self, id: &UniqueId, entity: &Entity) {
        self.entries.insert(id.clone(), FieldSnapshot::of(entity));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
