//! # Change Monitor
//!
//! Once per tick, compares every entity under local edit focus against the
//! last-known cache and turns meaningful differences into change events.
//! Sub-threshold jitter never leaves the peer; the send rate is bounded by
//! the rate of real edits.
//!
//! While disconnected the cache is still advanced, but instead of emitting
//! the entity is flagged unsynced for the reconnect flush.

use collab_shared::{ChangeEvent, ChangeKind, Payload};
use log::{debug, trace};

use crate::cache::LastKnownCache;
use crate::config::Thresholds;
use crate::scene::{EntityHandle, Scene};

/// Local change detector
#[derive(Debug, Default)]
pub struct ChangeMonitor {
    scans: u64,
}

impl ChangeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scans run so far
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Inspect `focus` and return the events to broadcast
    ///
    /// Entities without an id, unknown handles and entities written by a
    /// remote event during this tick are skipped.
    pub fn scan(
        &mut self,
        scene: &mut Scene,
        focus: &[EntityHandle],
        cache: &mut LastKnownCache,
        thresholds: &Thresholds,
        connected: bool,
    ) -> Vec<ChangeEvent> {
        self.scans += 1;
        let mut events = Vec::new();

        for &handle in focus {
            if scene.touched_remotely(handle) {
                trace!("Skipping {}: written remotely this tick", handle);
                continue;
            }
            let Some(entity) = scene.get(handle) else {
                continue;
            };
            let Some(id) = entity.unique_id.clone() else {
                continue;
            };

            let snapshot = cache.entry(&id);
            let mut changed = Vec::new();

            match snapshot.position {
                None => snapshot.position = Some(entity.position),
                Some(last) if thresholds.position_changed(&last, &entity.position) => {
                    snapshot.position = Some(entity.position);
                    changed.push((ChangeKind::Transform, Payload::Position(entity.position)));
                }
                _ => {}
            }

            match snapshot.rotation {
                None => snapshot.rotation = Some(entity.rotation),
                Some(last) if thresholds.rotation_changed(&last, &entity.rotation) => {
                    snapshot.rotation = Some(entity.rotation);
                    changed.push((ChangeKind::Rotate, Payload::Rotation(entity.rotation)));
                }
                _ => {}
            }

            match snapshot.scale {
                None => snapshot.scale = Some(entity.scale),
                Some(last) if thresholds.scale_changed(&last, &entity.scale) => {
                    snapshot.scale = Some(entity.scale);
                    changed.push((ChangeKind::Scale, Payload::Scale(entity.scale)));
                }
                _ => {}
            }

            if let Some(material) = &entity.material {
                match snapshot.material.clone() {
                    None => snapshot.material = Some(material.clone()),
                    Some(last) if thresholds.material_changed(&last, material) => {
                        snapshot.material = Some(material.clone());
                        changed.push((ChangeKind::Material, Payload::Material(material.clone())));
                    }
                    _ => {}
                }
            }

            if changed.is_empty() {
                continue;
            }

            if connected {
                let descriptor = entity.source.descriptor();
                for (kind, payload) in changed {
                    debug!("Local {} change on {} ({})", kind, id, entity.name);
                    events.push(
                        ChangeEvent::field(kind, id.as_str(), payload.encode())
                            .with_descriptor(Some(descriptor.clone())),
                    );
                }
            } else if let Some(entity) = scene.get_mut(handle) {
                debug!("Offline change on {} ({}), buffering", id, entity.name);
                entity.unsynced = true;
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Entity, Origin};
    use collab_shared::{PrimitiveShape, Rotator, Vector3};

    fn setup() -> (Scene, EntityHandle, LastKnownCache, ChangeMonitor) {
        let mut scene = Scene::new();
        let h = scene.insert(Entity::primitive("e1", PrimitiveShape::Cube).with_unique_id("e1"));
        (scene, h, LastKnownCache::new(), ChangeMonitor::new())
    }

    #[test]
    fn first_observation_only_seeds() {
        let (mut scene, h, mut cache, mut monitor) = setup();
        let events = monitor.scan(&mut scene, &[h], &mut cache, &Thresholds::default(), true);
        assert!(events.is_empty());
        assert_eq!(cache.get(&"e1".into()).unwrap().position, Some(Vector3::zero()));
    }

    #[test]
    fn position_change_emits_once() {
        let (mut scene, h, mut cache, mut monitor) = setup();
        let t = Thresholds::default();
        monitor.scan(&mut scene, &[h], &mut cache, &t, true);

        scene.set_position(h, Vector3::new(0.0, 0.02, 0.0), Origin::Local).unwrap();
        let events = monitor.scan(&mut scene, &[h], &mut cache, &t, true);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Transform);
        assert_eq!(events[0].entity_id, "e1");
        assert_eq!(events[0].payload, "0,0.02,0");
        assert_eq!(events[0].spawn_descriptor, Some(collab_shared::SpawnDescriptor::primitive(PrimitiveShape::Cube)));

        assert!(monitor.scan(&mut scene, &[h], &mut cache, &t, true).is_empty());
    }

    #[test]
    fn jitter_below_threshold_is_silent() {
        let (mut scene, h, mut cache, mut monitor) = setup();
        let t = Thresholds::default();
        monitor.scan(&mut scene, &[h], &mut cache, &t, true);

        scene.set_position(h, Vector3::new(0.004, 0.0, 0.0), Origin::Local).unwrap();
        scene.set_rotation(h, Rotator::new(0.0, 0.3, 0.0), Origin::Local).unwrap();
        scene.set_scale(h, Vector3::new(1.005, 1.0, 1.0), Origin::Local).unwrap();
        assert!(monitor.scan(&mut scene, &[h], &mut cache, &t, true).is_empty());
    }

    #[test]
    fn every_field_kind_is_detected() {
        let (mut scene, h, mut cache, mut monitor) = setup();
        scene.set_material(h, Some("Brick".to_string()), Origin::Local).unwrap();
        let t = Thresholds::default();
        monitor.scan(&mut scene, &[h], &mut cache, &t, true);

        scene.set_position(h, Vector3::new(1.0, 0.0, 0.0), Origin::Local).unwrap();
        scene.set_rotation(h, Rotator::new(0.0, 90.0, 0.0), Origin::Local).unwrap();
        scene.set_scale(h, Vector3::new(2.0, 2.0, 2.0), Origin::Local).unwrap();
        scene.set_material(h, Some("Glass".to_string()), Origin::Local).unwrap();

        let kinds: Vec<_> = monitor
            .scan(&mut scene, &[h], &mut cache, &t, true)
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![ChangeKind::Transform, ChangeKind::Rotate, ChangeKind::Scale, ChangeKind::Material]);
    }

    #[test]
    fn offline_changes_update_cache_and_flag() {
        let (mut scene, h, mut cache, mut monitor) = setup();
        let t = Thresholds::default();
        monitor.scan(&mut scene, &[h], &mut cache, &t, false);

        scene.set_position(h, Vector3::new(5.0, 0.0, 0.0), Origin::Local).unwrap();
        assert!(monitor.scan(&mut scene, &[h], &mut cache, &t, false).is_empty());
        assert!(scene.get(h).unwrap().unsynced);
        assert_eq!(cache.get(&"e1".into()).unwrap().position, Some(Vector3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn remote_writes_are_not_rebroadcast() {
        let (mut scene, h, mut cache, mut monitor) = setup();
        let t = Thresholds::default();
        monitor.scan(&mut scene, &[h], &mut cache, &t, true);

        scene.set_position(h, Vector3::new(3.0, 0.0, 0.0), Origin::Remote).unwrap();
        assert!(monitor.scan(&mut scene, &[h], &mut cache, &t, true).is_empty());
    }

    #[test]
    fn entities_without_id_are_ignored() {
        let mut scene = Scene::new();
        let h = scene.insert(Entity::primitive("anon", PrimitiveShape::Cube));
        let mut cache = LastKnownCache::new();
        let events = ChangeMonitor::new().scan(&mut scene, &[h], &mut cache, &Thresholds::default(), true);
        assert!(events.is_empty());
        assert!(cache.is_empty());
    }
}
