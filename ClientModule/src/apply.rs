//! # Apply Engine
//!
//! Receive side of replication. An inbound change event either updates an
//! entity this peer already knows, or spawns the entity first from the
//! event's spawn descriptor and then writes its full state.
//!
//! Every write is made with `Origin::Remote` and recorded in the last-known
//! cache, so the change monitor never sends a received value back out.

use collab_shared::constants::naming::{MISSING_ASSET_PREFIX, NETWORK_OBJECT_PREFIX};
use collab_shared::{ChangeEvent, ChangeKind, Payload, PrimitiveShape, Rotator, SpawnDescriptor, Vector3};
use log::{debug, info, warn};

use crate::assets::AssetLibrary;
use crate::cache::LastKnownCache;
use crate::config::Thresholds;
use crate::error::{SyncError, SyncResult};
use crate::identity::assign_identity;
use crate::scene::{Entity, EntityHandle, EntitySource, Origin, Scene, UniqueId};

/// Result of applying one inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The entity was unknown and has been spawned
    Spawned(EntityHandle),

    /// Fields written on a known entity
    Updated {
        handle: EntityHandle,
        fields: Vec<ChangeKind>,
    },

    /// Every carried value was already within threshold
    Unchanged,

    /// The entity has local edits peers have not seen yet
    RejectedUnsynced,

    /// Unknown entity and nothing to spawn it from
    DroppedUnknown,

    /// The payload did not decode
    Malformed,
}

impl ApplyOutcome {
    /// Whether the scene was written
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Spawned(_) | ApplyOutcome::Updated { .. })
    }
}

/// Inbound event applier
#[derive(Debug, Default)]
pub struct ApplyEngine {
    applied: u64,
    dropped: u64,
}

impl ApplyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events that changed the scene so far
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Events that were ignored or rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Apply one event to the scene
    ///
    /// Never fails: anything that cannot be applied is logged and reported
    /// through the outcome.
    pub fn apply(
        &mut self,
        scene: &mut Scene,
        assets: &dyn AssetLibrary,
        cache: &mut LastKnownCache,
        thresholds: &Thresholds,
        event: &ChangeEvent,
    ) -> ApplyOutcome {
        let outcome = match apply_event(scene, assets, cache, thresholds, event) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to apply {} for {}: {}", event.kind, event.entity_id, e);
                ApplyOutcome::Malformed
            }
        };

        if outcome.is_applied() {
            self.applied += 1;
        } else {
            self.dropped += 1;
        }
        outcome
    }
}

fn apply_event(
    scene: &mut Scene,
    assets: &dyn AssetLibrary,
    cache: &mut LastKnownCache,
    thresholds: &Thresholds,
    event: &ChangeEvent,
) -> SyncResult<ApplyOutcome> {
    let payload = match event.decode_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Dropping malformed {} event for {}: {}", event.kind, event.entity_id, e);
            return Ok(ApplyOutcome::Malformed);
        }
    };
    let id = UniqueId::from(event.entity_id.as_str());

    if let Some(handle) = scene.find_by_id(&id) {
        return update_known(scene, assets, cache, thresholds, handle, &id, &payload);
    }

    let descriptor = match (&event.spawn_descriptor, event.kind) {
        (Some(descriptor), _) => descriptor.clone(),
        (None, ChangeKind::Create) => SpawnDescriptor::primitive(PrimitiveShape::Cube),
        (None, kind) => {
            debug!("Dropping {} for unknown entity {} without spawn descriptor", kind, id);
            return Ok(ApplyOutcome::DroppedUnknown);
        }
    };

    let handle = scene.insert(build_entity(assets, &id, &descriptor));
    assign_identity(scene, handle, id.clone())?;
    write_spawn_state(scene, assets, handle, &payload)?;

    let entity = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?;
    cache.record_entity(&id, entity);
    info!("Spawned remote entity {} as {} ({})", id, handle, entity.name);
    Ok(ApplyOutcome::Spawned(handle))
}

/// Construct the local entity a descriptor asks for
///
/// An asset this peer cannot resolve, or a shape it does not know, becomes a
/// cube placeholder with a `MISSING:` name.
fn build_entity(assets: &dyn AssetLibrary, id: &UniqueId, descriptor: &SpawnDescriptor) -> Entity {
    match descriptor {
        SpawnDescriptor::Primitive(Ok(shape)) => {
            Entity::primitive(format!("{}{}", NETWORK_OBJECT_PREFIX, id.short()), *shape)
        }
        SpawnDescriptor::Asset(path) => match assets.instantiate(path) {
            Some(entity) => entity,
            None => {
                warn!("Asset {} not found for {}, spawning placeholder", path, id);
                placeholder(descriptor)
            }
        },
        SpawnDescriptor::Primitive(Err(shape)) => {
            warn!("Unknown primitive shape {} for {}, spawning placeholder", shape, id);
            placeholder(descriptor)
        }
    }
}

fn placeholder(descriptor: &SpawnDescriptor) -> Entity {
    Entity::new(
        format!("{}{}", MISSING_ASSET_PREFIX, descriptor.label()),
        EntitySource::Placeholder(descriptor.clone()),
    )
}

/// Write every field of a freshly spawned entity
fn write_spawn_state(
    scene: &mut Scene,
    assets: &dyn AssetLibrary,
    handle: EntityHandle,
    payload: &Payload,
) -> SyncResult<()> {
    match payload {
        Payload::Position(v) => scene.set_position(handle, *v, Origin::Remote),
        Payload::Rotation(r) => scene.set_rotation(handle, *r, Origin::Remote),
        Payload::Scale(v) => scene.set_scale(handle, *v, Origin::Remote),
        Payload::Material(name) => {
            if assets.has_material(name) {
                scene.set_material(handle, Some(name.clone()), Origin::Remote)
            } else {
                warn!("Material {} not found locally, leaving default", name);
                Ok(())
            }
        }
        Payload::Composite { position, rotation, scale } => {
            scene.set_position(handle, *position, Origin::Remote)?;
            scene.set_rotation(handle, *rotation, Origin::Remote)?;
            scene.set_scale(handle, *scale, Origin::Remote)
        }
    }
}

fn update_known(
    scene: &mut Scene,
    assets: &dyn AssetLibrary,
    cache: &mut LastKnownCache,
    thresholds: &Thresholds,
    handle: EntityHandle,
    id: &UniqueId,
    payload: &Payload,
) -> SyncResult<ApplyOutcome> {
    let entity = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?;
    if entity.unsynced {
        debug!("Rejecting remote update for {}: local edits pending", id);
        return Ok(ApplyOutcome::RejectedUnsynced);
    }

    let mut fields = Vec::new();
    match payload {
        Payload::Position(v) => write_position(scene, cache, thresholds, handle, id, *v, &mut fields)?,
        Payload::Rotation(r) => write_rotation(scene, cache, thresholds, handle, id, *r, &mut fields)?,
        Payload::Scale(v) => write_scale(scene, cache, thresholds, handle, id, *v, &mut fields)?,
        Payload::Material(name) => write_material(scene, assets, cache, handle, id, name, &mut fields)?,
        Payload::Composite { position, rotation, scale } => {
            write_position(scene, cache, thresholds, handle, id, *position, &mut fields)?;
            write_rotation(scene, cache, thresholds, handle, id, *rotation, &mut fields)?;
            write_scale(scene, cache, thresholds, handle, id, *scale, &mut fields)?;
        }
    }

    if fields.is_empty() {
        Ok(ApplyOutcome::Unchanged)
    } else {
        debug!("Applied {:?} to {}", fields, id);
        Ok(ApplyOutcome::Updated { handle, fields })
    }
}

fn write_position(
    scene: &mut Scene,
    cache: &mut LastKnownCache,
    thresholds: &Thresholds,
    handle: EntityHandle,
    id: &UniqueId,
    value: Vector3,
    fields: &mut Vec<ChangeKind>,
) -> SyncResult<()> {
    let current = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?.position;
    if thresholds.position_changed(&current, &value) {
        scene.set_position(handle, value, Origin::Remote)?;
        cache.entry(id).position = Some(value);
        fields.push(ChangeKind::Transform);
    }
    Ok(())
}

fn write_rotation(
    scene: &mut Scene,
    cache: &mut LastKnownCache,
    thresholds: &Thresholds,
    handle: EntityHandle,
    id: &UniqueId,
    value: Rotator,
    fields: &mut Vec<ChangeKind>,
) -> SyncResult<()> {
    let current = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?.rotation;
    if thresholds.rotation_changed(&current, &value) {
        scene.set_rotation(handle, value, Origin::Remote)?;
        cache.entry(id).rotation = Some(value);
        fields.push(ChangeKind::Rotate);
    }
    Ok(())
}

fn write_scale(
    scene: &mut Scene,
    cache: &mut LastKnownCache,
    thresholds: &Thresholds,
    handle: EntityHandle,
    id: &UniqueId,
    value: Vector3,
    fields: &mut Vec<ChangeKind>,
) -> SyncResult<()> {
    let current = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?.scale;
    if thresholds.scale_changed(&current, &value) {
        scene.set_scale(handle, value, Origin::Remote)?;
        cache.entry(id).scale = Some(value);
        fields.push(ChangeKind::Scale);
    }
    Ok(())
}

fn write_material(
    scene: &mut Scene,
    assets: &dyn AssetLibrary,
    cache: &mut LastKnownCache,
    handle: EntityHandle,
    id: &UniqueId,
    name: &str,
    fields: &mut Vec<ChangeKind>,
) -> SyncResult<()> {
    let current = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?.material.as_deref();
    if current == Some(name) {
        return Ok(());
    }
    if !assets.has_material(name) {
        warn!("Material {} not found locally, skipping update for {}", name, id);
        return Ok(());
    }
    scene.set_material(handle, Some(name.to_string()), Origin::Remote)?;
    cache.entry(id).material = Some(name.to_string());
    fields.push(ChangeKind::Material);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetLibrary;
    use collab_shared::decode_event;

    struct Peer {
        scene: Scene,
        assets: MemoryAssetLibrary,
        cache: LastKnownCache,
        engine: ApplyEngine,
    }

    impl Peer {
        fn new(assets: MemoryAssetLibrary) -> Self {
            Self {
                scene: Scene::new(),
                assets,
                cache: LastKnownCache::new(),
                engine: ApplyEngine::new(),
            }
        }

        fn apply(&mut self, event: &ChangeEvent) -> ApplyOutcome {
            self.engine.apply(
                &mut self.scene,
                &self.assets,
                &mut self.cache,
                &Thresholds::default(),
                event,
            )
        }
    }

    fn sphere_create() -> ChangeEvent {
        decode_event(
            r#"{"kind":"create","entityID":"x9","spawnDescriptor":"primitive:Sphere","payload":"1,2,3|0,0,0|1,1,1","timestamp":1}"#,
        )
        .unwrap()
    }

    #[test]
    fn create_spawns_sphere_with_incoming_id() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let handle = match peer.apply(&sphere_create()) {
            ApplyOutcome::Spawned(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };

        assert_eq!(peer.scene.len(), 1);
        let entity = peer.scene.get(handle).unwrap();
        assert_eq!(entity.source, EntitySource::Primitive(PrimitiveShape::Sphere));
        assert_eq!(entity.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(entity.rotation, Rotator::zero());
        assert_eq!(entity.scale, Vector3::one());
        assert_eq!(entity.unique_id, Some(UniqueId::from("x9")));
        assert_eq!(entity.name, "NetObj_x9");
        assert_eq!(peer.scene.find_by_id(&"x9".into()), Some(handle));
        assert!(peer.scene.touched_remotely(handle));
    }

    #[test]
    fn applying_twice_changes_nothing_more() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let event = sphere_create();
        assert!(matches!(peer.apply(&event), ApplyOutcome::Spawned(_)));
        let after_first: Vec<Entity> = peer.scene.iter().cloned().collect();

        assert_eq!(peer.apply(&event), ApplyOutcome::Unchanged);
        let after_second: Vec<Entity> = peer.scene.iter().cloned().collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn update_before_create_is_dropped_then_create_succeeds() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let update = ChangeEvent::field(ChangeKind::Transform, "x9", "4,4,4");
        assert_eq!(peer.apply(&update), ApplyOutcome::DroppedUnknown);
        assert!(peer.scene.is_empty());

        assert!(matches!(peer.apply(&sphere_create()), ApplyOutcome::Spawned(_)));
        assert!(matches!(peer.apply(&update), ApplyOutcome::Updated { .. }));
        let handle = peer.scene.find_by_id(&"x9".into()).unwrap();
        assert_eq!(peer.scene.get(handle).unwrap().position, Vector3::new(4.0, 4.0, 4.0));
    }

    #[test]
    fn update_with_descriptor_spawns_missing_entity() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let update = ChangeEvent::field(ChangeKind::Scale, "late", "2,2,2")
            .with_descriptor(Some(SpawnDescriptor::primitive(PrimitiveShape::Capsule)));
        let handle = match peer.apply(&update) {
            ApplyOutcome::Spawned(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };
        let entity = peer.scene.get(handle).unwrap();
        assert_eq!(entity.scale, Vector3::new(2.0, 2.0, 2.0));
        assert_eq!(entity.position, Vector3::zero());
    }

    #[test]
    fn missing_asset_becomes_placeholder() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let event = ChangeEvent::create(
            "t1",
            SpawnDescriptor::asset("Props/Tree"),
            Vector3::new(0.0, 1.0, 0.0),
            Rotator::zero(),
            Vector3::one(),
        );
        let handle = match peer.apply(&event) {
            ApplyOutcome::Spawned(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };
        let entity = peer.scene.get(handle).unwrap();
        assert_eq!(entity.name, "MISSING: Props/Tree");
        assert_eq!(entity.source, EntitySource::Placeholder(SpawnDescriptor::asset("Props/Tree")));
        assert_eq!(entity.source.descriptor(), SpawnDescriptor::asset("Props/Tree"));
        assert_eq!(entity.position, Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn known_asset_is_instantiated() {
        let library = MemoryAssetLibrary::new()
            .with_prefab("Props/Tree", Entity::primitive("Tree", PrimitiveShape::Cylinder));
        let mut peer = Peer::new(library);
        let event = ChangeEvent::create("t1", SpawnDescriptor::asset("Props/Tree"), Vector3::zero(), Rotator::zero(), Vector3::one());
        let handle = match peer.apply(&event) {
            ApplyOutcome::Spawned(handle) => handle,
            other => panic!("unexpected outcome {:?}", other),
        };
        let entity = peer.scene.get(handle).unwrap();
        assert_eq!(entity.name, "Tree");
        assert_eq!(entity.source, EntitySource::Asset("Props/Tree".to_string()));
    }

    #[test]
    fn unsynced_entities_reject_remote_updates() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let handle = peer.scene.insert(Entity::primitive("mine", PrimitiveShape::Cube).with_unique_id("m1"));
        peer.scene.get_mut(handle).unwrap().unsynced = true;

        let update = ChangeEvent::field(ChangeKind::Transform, "m1", "9,9,9");
        assert_eq!(peer.apply(&update), ApplyOutcome::RejectedUnsynced);
        assert_eq!(peer.scene.get(handle).unwrap().position, Vector3::zero());
    }

    #[test]
    fn sub_threshold_updates_are_not_written() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let handle = peer.scene.insert(Entity::primitive("a", PrimitiveShape::Cube).with_unique_id("a"));

        let update = ChangeEvent::field(ChangeKind::Transform, "a", "0.005,0,0");
        assert_eq!(peer.apply(&update), ApplyOutcome::Unchanged);
        assert!(!peer.scene.touched_remotely(handle));
    }

    #[test]
    fn unresolved_material_is_skipped() {
        let mut peer = Peer::new(MemoryAssetLibrary::new().with_material("Brick"));
        let handle = peer.scene.insert(Entity::primitive("wall", PrimitiveShape::Cube).with_unique_id("w"));

        let unknown = ChangeEvent::field(ChangeKind::Material, "w", "Marble");
        assert_eq!(peer.apply(&unknown), ApplyOutcome::Unchanged);
        assert_eq!(peer.scene.get(handle).unwrap().material, None);

        let known = ChangeEvent::field(ChangeKind::Material, "w", "Brick");
        assert_eq!(
            peer.apply(&known),
            ApplyOutcome::Updated { handle, fields: vec![ChangeKind::Material] }
        );
        assert_eq!(peer.cache.get(&"w".into()).unwrap().material.as_deref(), Some("Brick"));
    }

    #[test]
    fn malformed_payload_is_reported() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        let event = ChangeEvent::field(ChangeKind::Transform, "a", "not,a,vector")
            .with_descriptor(Some(SpawnDescriptor::primitive(PrimitiveShape::Cube)));
        assert_eq!(peer.apply(&event), ApplyOutcome::Malformed);
        assert!(peer.scene.is_empty());
        assert_eq!(peer.engine.dropped(), 1);
    }

    #[test]
    fn applied_values_seed_the_cache() {
        let mut peer = Peer::new(MemoryAssetLibrary::new());
        peer.apply(&sphere_create());
        let snapshot = peer.cache.get(&"x9".into()).unwrap();
        assert_eq!(snapshot.position, Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(snapshot.scale, Some(Vector3::one()));
    }
}
