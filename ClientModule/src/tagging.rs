//! # Auto-Tagging
//!
//! Decides which entities take part in replication and bulk-assigns ids to
//! a scene that was built before syncing was switched on.

use collab_shared::constants::naming::SYSTEM_OBJECT_PREFIX;
use log::info;

use crate::error::SyncResult;
use crate::identity::ensure_identity;
use crate::scene::{Entity, EntityRole, Scene};

/// Whether an entity should be replicated at all
///
/// System objects (leading `_`), cameras, lights and anything without
/// geometry stay local.
pub fn should_track(entity: &Entity) -> bool {
    if entity.name.starts_with(SYSTEM_OBJECT_PREFIX) {
        return false;
    }
    matches!(entity.role, EntityRole::Renderable)
}

/// Give every trackable entity without an id a fresh one
///
/// Returns how many entities were tagged.
pub fn tag_all(scene: &mut Scene) -> SyncResult<usize> {
    let untagged: Vec<_> = scene
        .iter()
        .filter(|e| e.unique_id.is_none() && should_track(e))
        .map(|e| e.handle)
        .collect();

    for handle in &untagged {
        ensure_identity(scene, *handle)?;
    }

    info!("Tagged {} untracked entities", untagged.len());
    Ok(untagged.len())
}
