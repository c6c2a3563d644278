//! # Upload Queue
//!
//! Newly introduced entities are broadcast as a single `create` event, but
//! never on the tick they were enqueued: hosts often finish constructing an
//! entity (components, initial transform) one tick late. Entries become
//! ready on the first tick strictly after the enqueue tick.

use std::collections::HashSet;

use collab_shared::{ChangeEvent, ChangeKind};
use log::{debug, info};

use crate::cache::LastKnownCache;
use crate::error::{SyncError, SyncResult};
use crate::identity::ensure_identity;
use crate::scene::{Entity, EntityHandle, Scene, UniqueId};

/// Deduplicated FIFO of entities awaiting their first full-state broadcast
#[derive(Debug, Default)]
pub struct UploadQueue {
    pending: Vec<(EntityHandle, u64)>,
    members: HashSet<EntityHandle>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `handle` at tick `tick`; returns false if already queued
    pub fn enqueue(&mut self, handle: EntityHandle, tick: u64) -> bool {
        if !self.members.insert(handle) {
            return false;
        }
        self.pending.push((handle, tick));
        true
    }

    /// Remove and return every entry enqueued before `tick`, in order
    pub fn take_ready(&mut self, tick: u64) -> Vec<EntityHandle> {
        let mut ready = Vec::new();
        self.pending.retain(|&(handle, queued_at)| {
            if queued_at < tick {
                ready.push(handle);
                false
            } else {
                true
            }
        });
        for handle in &ready {
            self.members.remove(handle);
        }
        ready
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.members.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Turn every ready entry into upload events
    ///
    /// Each entity's identity is re-validated first. While disconnected the
    /// entity is only flagged unsynced; the reconnect flush queues it again.
    pub fn process_ready(
        &mut self,
        tick: u64,
        scene: &mut Scene,
        cache: &mut LastKnownCache,
        connected: bool,
    ) -> SyncResult<Vec<ChangeEvent>> {
        let mut events = Vec::new();

        for handle in self.take_ready(tick) {
            let outcome = match ensure_identity(scene, handle) {
                Ok(outcome) => outcome,
                Err(SyncError::UnknownHandle(_)) => {
                    debug!("Queued entity {} no longer exists, skipping upload", handle);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let id = outcome.id().clone();
            let entity = scene.get_mut_or_err(handle)?;

            if !connected {
                entity.unsynced = true;
                continue;
            }

            events.extend(upload_events(&id, entity));
            cache.record_entity(&id, entity);
            entity.unsynced = false;
            info!("Uploaded new entity {} ({})", id, entity.name);
        }

        Ok(events)
    }
}

/// Full-state events for one entity: a `create`, plus a `material` event
/// when a material is assigned
pub fn upload_events(id: &UniqueId, entity: &Entity) -> Vec<ChangeEvent> {
    let descriptor = entity.source.descriptor();
    let mut events = vec![ChangeEvent::create(
        id.as_str(),
        descriptor.clone(),
        entity.position,
        entity.rotation,
        entity.scale,
    )];
    if let Some(material) = &entity.material {
        events.push(ChangeEvent::field(ChangeKind::Material, id.as_str(), material.clone()).with_descriptor(Some(descriptor)));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_shared::{Payload, PrimitiveShape, SpawnDescriptor, Vector3};

    #[test]
    fn entries_wait_one_tick_and_deduplicate() {
        let mut queue = UploadQueue::new();
        assert!(queue.enqueue(EntityHandle(1), 5));
        assert!(!queue.enqueue(EntityHandle(1), 5));
        assert!(queue.enqueue(EntityHandle(2), 6));

        assert!(queue.take_ready(5).is_empty());
        assert_eq!(queue.take_ready(6), vec![EntityHandle(1)]);
        assert_eq!(queue.take_ready(7), vec![EntityHandle(2)]);
        assert!(queue.is_empty());
        assert!(queue.enqueue(EntityHandle(1), 7));
    }

    #[test]
    fn processing_emits_create_and_material() {
        let mut scene = Scene::new();
        let mut cache = LastKnownCache::new();
        let mut queue = UploadQueue::new();
        let h = scene.insert(
            Entity::primitive("Ball", PrimitiveShape::Sphere)
                .with_position(Vector3::new(1.0, 2.0, 3.0))
                .with_material("Rubber"),
        );
        queue.enqueue(h, 1);

        assert!(queue.process_ready(1, &mut scene, &mut cache, true).unwrap().is_empty());
        let events = queue.process_ready(2, &mut scene, &mut cache, true).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ChangeKind::Create);
        assert_eq!(events[0].spawn_descriptor, Some(SpawnDescriptor::primitive(PrimitiveShape::Sphere)));
        match events[0].decode_payload().unwrap() {
            Payload::Composite { position, .. } => assert_eq!(position, Vector3::new(1.0, 2.0, 3.0)),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(events[1].kind, ChangeKind::Material);
        assert_eq!(events[1].payload, "Rubber");

        let entity = scene.get(h).unwrap();
        assert!(!entity.unsynced);
        let id = entity.unique_id.clone().unwrap();
        assert_eq!(cache.get(&id).unwrap().material.as_deref(), Some("Rubber"));
    }

    #[test]
    fn offline_processing_only_flags() {
        let mut scene = Scene::new();
        let mut cache = LastKnownCache::new();
        let mut queue = UploadQueue::new();
        let h = scene.insert(Entity::primitive("Box", PrimitiveShape::Cube).with_unique_id("box"));
        queue.enqueue(h, 1);

        let events = queue.process_ready(2, &mut scene, &mut cache, false).unwrap();
        assert!(events.is_empty());
        assert!(scene.get(h).unwrap().unsynced);
        assert!(queue.is_empty());
    }

    #[test]
    fn vanished_entities_are_skipped() {
        let mut scene = Scene::new();
        let mut queue = UploadQueue::new();
        queue.enqueue(EntityHandle(77), 0);
        let events = queue
            .process_ready(1, &mut scene, &mut LastKnownCache::new(), true)
            .unwrap();
        assert!(events.is_empty());
    }
}
