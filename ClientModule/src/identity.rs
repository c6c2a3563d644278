//! # Identity
//!
//! Assigns replication ids and heals clones. Hosts copy every field of an
//! entity on duplicate, so a fresh copy holds the same `UniqueId` as its
//! source until [`ensure_identity`] sees it. A copy is recognised by its stored
//! handle pointing at a different entity while another live entity still
//! holds the id; the copy gets a new id and is treated as newly created.

use log::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::scene::{EntityHandle, Scene, UniqueId};

/// Result of validating one entity's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The entity already had a valid id
    Existing(UniqueId),

    /// The entity had no id and was given one
    Generated(UniqueId),

    /// The entity was a clone; it now holds `fresh` instead of `previous`
    CloneHealed { previous: UniqueId, fresh: UniqueId },
}

impl IdentityOutcome {
    /// The id the entity holds now
    pub fn id(&self) -> &UniqueId {
        match self {
            IdentityOutcome::Existing(id) | IdentityOutcome::Generated(id) => id,
            IdentityOutcome::CloneHealed { fresh, .. } => fresh,
        }
    }

    pub fn is_clone(&self) -> bool {
        matches!(self, IdentityOutcome::CloneHealed { .. })
    }
}

/// Make sure `handle` holds a valid, unshared id
///
/// New and healed ids mark the entity unsynced. The stored handle is
/// refreshed in every case.
pub fn ensure_identity(scene: &mut Scene, handle: EntityHandle) -> SyncResult<IdentityOutcome> {
    let entity = scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?;

    let outcome = match entity.unique_id.clone() {
        None => IdentityOutcome::Generated(UniqueId::generate()),
        Some(id) => {
            let stored_matches = entity.stored_handle == Some(handle);
            let shared = scene.holders_of(&id).into_iter().any(|h| h != handle);
            if !stored_matches && shared {
                IdentityOutcome::CloneHealed { previous: id, fresh: UniqueId::generate() }
            } else {
                IdentityOutcome::Existing(id)
            }
        }
    };

    let entity = scene.get_mut_or_err(handle)?;
    match &outcome {
        IdentityOutcome::Existing(_) => {}
        IdentityOutcome::Generated(id) => {
            entity.unique_id = Some(id.clone());
            entity.unsynced = true;
            debug!("Assigned id {} to {} ({})", id, handle, entity.name);
        }
        IdentityOutcome::CloneHealed { previous, fresh } => {
            entity.unique_id = Some(fresh.clone());
            entity.unsynced = true;
            info!("Clone detected: {} ({}) re-identified {} -> {}", handle, entity.name, previous, fresh);
        }
    }
    entity.stored_handle = Some(handle);
    Ok(outcome)
}

/// Give `handle` an id chosen elsewhere (a remote spawn)
pub fn assign_identity(scene: &mut Scene, handle: EntityHandle, id: UniqueId) -> SyncResult<()> {
    let entity = scene.get_mut_or_err(handle)?;
    entity.unique_id = Some(id);
    entity.stored_handle = Some(handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Entity;
    use collab_shared::PrimitiveShape;

    fn cube(scene: &mut Scene) -> EntityHandle {
        scene.insert(Entity::primitive("Cube", PrimitiveShape::Cube))
    }

    #[test]
    fn generates_id_and_marks_unsynced() {
        let mut scene = Scene::new();
        let h = cube(&mut scene);

        let outcome = ensure_identity(&mut scene, h).unwrap();
        assert!(matches!(outcome, IdentityOutcome::Generated(_)));
        let entity = scene.get(h).unwrap();
        assert_eq!(entity.unique_id.as_ref(), Some(outcome.id()));
        assert_eq!(entity.stored_handle, Some(h));
        assert!(entity.unsynced);
        assert_eq!(scene.find_by_id(outcome.id()), Some(h));
    }

    #[test]
    fn second_pass_keeps_existing_id() {
        let mut scene = Scene::new();
        let h = cube(&mut scene);
        let first = ensure_identity(&mut scene, h).unwrap();
        let second = ensure_identity(&mut scene, h).unwrap();
        assert_eq!(second, IdentityOutcome::Existing(first.id().clone()));
    }

    #[test]
    fn clone_is_healed_in_one_pass() {
        let mut scene = Scene::new();
        let original = cube(&mut scene);
        let id = ensure_identity(&mut scene, original).unwrap().id().clone();
        scene.get_mut(original).unwrap().unsynced = false;
        let copy = scene.duplicate(original).unwrap();

        for h in scene.handles() {
            ensure_identity(&mut scene, h).unwrap();
        }

        let kept = scene.get(original).unwrap();
        let healed = scene.get(copy).unwrap();
        assert_eq!(kept.unique_id.as_ref(), Some(&id));
        assert!(!kept.unsynced);
        assert_ne!(healed.unique_id.as_ref(), Some(&id));
        assert!(healed.unique_id.is_some());
        assert!(healed.unsynced);
        assert_eq!(scene.find_by_id(&id), Some(original));
    }

    #[test]
    fn clone_processed_first_is_still_the_one_healed() {
        let mut scene = Scene::new();
        let original = cube(&mut scene);
        let id = ensure_identity(&mut scene, original).unwrap().id().clone();
        let copy = scene.duplicate(original).unwrap();

        let outcome = ensure_identity(&mut scene, copy).unwrap();
        assert!(outcome.is_clone());
        let outcome = ensure_identity(&mut scene, original).unwrap();
        assert_eq!(outcome, IdentityOutcome::Existing(id));
    }

    #[test]
    fn stale_stored_handle_without_other_holder_is_not_a_clone() {
        let mut scene = Scene::new();
        let mut entity = Entity::primitive("Loaded", PrimitiveShape::Cube).with_unique_id("persisted");
        entity.stored_handle = Some(EntityHandle(9999));
        let h = scene.insert(entity);

        let outcome = ensure_identity(&mut scene, h).unwrap();
        assert_eq!(outcome, IdentityOutcome::Existing(UniqueId::from("persisted")));
        assert_eq!(scene.get(h).unwrap().stored_handle, Some(h));
        assert!(!scene.get(h).unwrap().unsynced);
    }

    #[test]
    fn unknown_handle_is_an_error() {
        let mut scene = Scene::new();
        assert!(ensure_identity(&mut scene, EntityHandle(42)).is_err());
    }
}
