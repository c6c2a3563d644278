//! # Scene Model
//!
//! The local entity collection the engine watches and mutates. This is the
//! engine's view of the host editor's object graph: every entity carries the
//! replicated fields (position, rotation, scale, material) plus the identity
//! bookkeeping the sync protocol needs.
//!
//! All field writes go through `set_*` methods that take an [`Origin`].
//! Writes with `Origin::Remote` mark the entity as touched for the current
//! tick so the change monitor leaves it alone until the next one.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use collab_shared::{PrimitiveShape, Rotator, SpawnDescriptor, Vector3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// Process-local handle of a concrete in-memory entity
///
/// Never reused within one scene. Entities persist the handle they were last
/// seen with as `stored_handle`; a copy made by the host carries the original's
/// value, which is how clones are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Durable identifier shared by every peer for one logical entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId(String);

impl UniqueId {
    /// A fresh random (v4) id
    pub fn generate() -> Self {
        UniqueId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First four characters, used in generated entity names
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(4) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl From<String> for UniqueId {
    fn from(value: String) -> Self {
        UniqueId(value)
    }
}

impl From<&str> for UniqueId {
    fn from(value: &str) -> Self {
        UniqueId(value.to_string())
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is writing a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A local editing action
    Local,

    /// An event applied from another peer
    Remote,
}

/// What an entity was built from, reported to peers as its spawn descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitySource {
    /// A built-in primitive shape
    Primitive(PrimitiveShape),

    /// An instantiated asset
    Asset(String),

    /// Stand-in for a descriptor this peer could not resolve
    Placeholder(SpawnDescriptor),
}

impl EntitySource {
    /// Descriptor telling a peer how to rebuild this entity
    ///
    /// Placeholders advertise what they stand in for, so peers that can
    /// resolve it still spawn the real thing.
    pub fn descriptor(&self) -> SpawnDescriptor {
        match self {
            EntitySource::Primitive(shape) => SpawnDescriptor::primitive(*shape),
            EntitySource::Asset(path) => SpawnDescriptor::asset(path.clone()),
            EntitySource::Placeholder(missing) => missing.clone(),
        }
    }
}

/// Broad category of an entity, used to decide whether it is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRole {
    /// Has visible geometry
    Renderable,
    Camera,
    Light,
    /// Grouping node with nothing to render
    Empty,
}

/// A trackable object in the local scene
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Current process-local handle (assigned on insert)
    pub handle: EntityHandle,

    /// Display name
    pub name: String,

    /// Replication id, absent until one is assigned
    pub unique_id: Option<UniqueId>,

    /// Handle recorded the last time identity was validated
    pub stored_handle: Option<EntityHandle>,

    /// Local changes exist that peers have not seen
    pub unsynced: bool,

    pub position: Vector3,

    /// Euler rotation in degrees
    pub rotation: Rotator,

    pub scale: Vector3,

    /// Name of the assigned material, if any
    pub material: Option<String>,

    pub source: EntitySource,

    pub role: EntityRole,
}

impl Entity {
    /// A renderable entity at the origin with unit scale
    pub fn new(name: impl Into<String>, source: EntitySource) -> Self {
        Self {
            handle: EntityHandle(0),
            name: name.into(),
            unique_id: None,
            stored_handle: None,
            unsynced: false,
            position: Vector3::zero(),
            rotation: Rotator::zero(),
            scale: Vector3::one(),
            material: None,
            source,
            role: EntityRole::Renderable,
        }
    }

    pub fn primitive(name: impl Into<String>, shape: PrimitiveShape) -> Self {
        Self::new(name, EntitySource::Primitive(shape))
    }

    pub fn with_position(mut self, position: Vector3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotator) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vector3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn with_role(mut self, role: EntityRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_unique_id(mut self, id: impl Into<UniqueId>) -> Self {
        self.unique_id = Some(id.into());
        self
    }
}

/// The local entity collection
#[derive(Debug, Default)]
pub struct Scene {
    entities: BTreeMap<EntityHandle, Entity>,
    next_handle: u64,
    remote_touched: HashSet<EntityHandle>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity and return its freshly assigned handle
    pub fn insert(&mut self, mut entity: Entity) -> EntityHandle {
        self.next_handle += 1;
        let handle = EntityHandle(self.next_handle);
        entity.handle = handle;
        self.entities.insert(handle, entity);
        handle
    }

    /// Copy an entity the way an editor duplicate does: every field,
    /// including the replication id and stored handle, is carried over
    pub fn duplicate(&mut self, handle: EntityHandle) -> Option<EntityHandle> {
        let copy = self.entities.get(&handle)?.clone();
        Some(self.insert(copy))
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(&handle)
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.entities.get_mut(&handle)
    }

    pub(crate) fn get_mut_or_err(&mut self, handle: EntityHandle) -> SyncResult<&mut Entity> {
        self.entities.get_mut(&handle).ok_or(SyncError::UnknownHandle(handle))
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn handles(&self) -> Vec<EntityHandle> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Every live entity currently holding `id`
    pub fn holders_of(&self, id: &UniqueId) -> Vec<EntityHandle> {
        self.entities
            .values()
            .filter(|e| e.unique_id.as_ref() == Some(id))
            .map(|e| e.handle)
            .collect()
    }

    /// The entity that owns `id`
    ///
    /// While an unhealed clone exists, the holder whose stored handle matches
    /// its own handle is preferred.
    pub fn find_by_id(&self, id: &UniqueId) -> Option<EntityHandle> {
        let holders = self.holders_of(id);
        holders
            .iter()
            .copied()
            .find(|h| self.entities.get(h).and_then(|e| e.stored_handle) == Some(*h))
            .or_else(|| holders.first().copied())
    }

    pub fn set_position(&mut self, handle: EntityHandle, value: Vector3, origin: Origin) -> SyncResult<()> {
        self.get_mut_or_err(handle)?.position = value;
        self.touch(handle, origin);
        Ok(())
    }

    pub fn set_rotation(&mut self, handle: EntityHandle, value: Rotator, origin: Origin) -> SyncResult<()> {
        self.get_mut_or_err(handle)?.rotation = value;
        self.touch(handle, origin);
        Ok(())
    }

    pub fn set_scale(&mut self, handle: EntityHandle, value: Vector3, origin: Origin) -> SyncResult<()> {
        self.get_mut_or_err(handle)?.scale = value;
        self.touch(handle, origin);
        Ok(())
    }

    pub fn set_material(&mut self, handle: EntityHandle, value: Option<String>, origin: Origin) -> SyncResult<()> {
        self.get_mut_or_err(handle)?.material = value;
        self.touch(handle, origin);
        Ok(())
    }

    /// Whether a remote write hit this entity during the current tick
    pub fn touched_remotely(&self, handle: EntityHandle) -> bool {
        self.remote_touched.contains(&handle)
    }

    /// Start a new tick; forgets which entities were remotely written
    pub fn begin_tick(&mut self) {
        self.remote_touched.clear();
    }

    fn touch(&mut self, handle: EntityHandle, origin: Origin) {
        if origin == Origin::Remote {
            self.remote_touched.insert(handle);
        }
    }
}
