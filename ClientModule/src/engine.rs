//! # Sync Engine
//!
//! The per-peer context that owns every piece of replication state and
//! drives it one tick at a time. Hosts call the hook methods
//! (`entity_created`, `set_focus`) as the user edits, and call `tick`
//! on a steady cadence, usually through [`crate::scheduler::run`].
//!
//! A tick runs, in order:
//! 1. inbound: drain the transport and apply every received event
//! 2. uploads: broadcast entities whose deferral has elapsed
//! 3. monitor: detect local edits on focused entities
//! 4. outbound: stamp and send everything produced above

use collab_shared::{ChangeEvent, ConnectionParams, ConnectionState, DisconnectReason};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::apply::{ApplyEngine, ApplyOutcome};
use crate::assets::AssetLibrary;
use crate::cache::LastKnownCache;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::identity::{ensure_identity, IdentityOutcome};
use crate::monitor::ChangeMonitor;
use crate::scene::{EntityHandle, Scene};
use crate::tagging::{should_track, tag_all};
use crate::transport::{Transport, TransportSignal};
use crate::upload::UploadQueue;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,

    /// Inbound events that changed the scene
    pub applied: usize,

    /// Inbound events that were ignored or rejected
    pub dropped: usize,

    /// Outbound events handed to the transport
    pub sent: usize,

    /// Outbound events the transport refused
    pub send_failures: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.applied == 0 && self.dropped == 0 && self.sent == 0 && self.send_failures == 0
    }
}

/// Replication context for one peer
pub struct SyncEngine<T: Transport> {
    config: SyncConfig,
    scene: Scene,
    assets: Box<dyn AssetLibrary>,
    cache: LastKnownCache,
    monitor: ChangeMonitor,
    uploads: UploadQueue,
    applier: ApplyEngine,
    transport: T,
    state: ConnectionState,
    tick: u64,
    clock: i64,
    peer_id: String,
    focus: Vec<EntityHandle>,
    backlog: Vec<TransportSignal>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(config: SyncConfig, transport: T, assets: Box<dyn AssetLibrary>) -> Self {
        Self {
            config,
            scene: Scene::new(),
            assets,
            cache: LastKnownCache::new(),
            monitor: ChangeMonitor::new(),
            uploads: UploadQueue::new(),
            applier: ApplyEngine::new(),
            transport,
            state: ConnectionState::Disconnected,
            tick: 0,
            clock: 0,
            peer_id: Uuid::new_v4().to_string(),
            focus: Vec::new(),
            backlog: Vec::new(),
        }
    }

    /// Open the transport and join the session
    ///
    /// Entities edited while offline are queued for upload once the link is
    /// up. Returns false if the transport could not be opened.
    pub async fn connect(&mut self, params: &ConnectionParams) -> bool {
        if self.state == ConnectionState::Connected {
            self.transport.close();
        }
        self.state = ConnectionState::Connecting;

        match self.transport.open(params).await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                let flushed = self.flush_unsynced();
                info!("Connected to session (peer {}), {} offline entities queued", self.peer_id, flushed);
                true
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
                self.state = ConnectionState::Failed;
                false
            }
        }
    }

    /// Leave the session; returns false if not connected
    ///
    /// Events that already arrived are kept and applied on the next tick.
    pub fn disconnect(&mut self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        self.backlog.extend(self.transport.drain());
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        info!("Disconnected: {}", DisconnectReason::ClientRequest);
        true
    }

    /// Construction hook: the host just created `handle`
    ///
    /// Returns whether the entity is replicated. Tracked entities get an id
    /// and are broadcast on the tick after the upcoming one.
    pub fn entity_created(&mut self, handle: EntityHandle) -> SyncResult<bool> {
        let entity = self.scene.get(handle).ok_or(SyncError::UnknownHandle(handle))?;
        if !should_track(entity) {
            debug!("Not tracking {} ({})", handle, entity.name);
            return Ok(false);
        }
        ensure_identity(&mut self.scene, handle)?;
        let upcoming = self.upcoming_tick();
        self.uploads.enqueue(handle, upcoming);
        Ok(true)
    }

    /// Replace the set of entities under local edit focus
    ///
    /// Entities entering focus have their identity checked; clones and
    /// entities that had no id yet are queued for upload.
    pub fn set_focus(&mut self, handles: &[EntityHandle]) {
        let upcoming = self.upcoming_tick();
        for &handle in handles {
            if self.focus.contains(&handle) {
                continue;
            }
            let Some(entity) = self.scene.get(handle) else {
                continue;
            };
            if !should_track(entity) {
                continue;
            }
            match ensure_identity(&mut self.scene, handle) {
                Ok(IdentityOutcome::Existing(_)) => {}
                Ok(_) => {
                    self.uploads.enqueue(handle, upcoming);
                }
                Err(e) => warn!("Identity check failed for {}: {}", handle, e),
            }
        }
        self.focus = handles.to_vec();
    }

    /// Queue every unsynced entity for a full upload
    ///
    /// The flag stays set until the upload is actually sent, so remote
    /// updates keep being rejected in the meantime. Returns how many
    /// entities were queued.
    pub fn flush_unsynced(&mut self) -> usize {
        let unsynced: Vec<EntityHandle> = self.scene.iter().filter(|e| e.unsynced).map(|e| e.handle).collect();
        let upcoming = self.upcoming_tick();
        for &handle in &unsynced {
            self.uploads.enqueue(handle, upcoming);
        }
        unsynced.len()
    }

    /// Give an id to every trackable entity in a pre-existing scene
    ///
    /// Tagged entities are marked unsynced; while connected they are queued
    /// for upload right away, otherwise they go out with the reconnect flush.
    pub fn tag_scene(&mut self) -> SyncResult<usize> {
        let tagged = tag_all(&mut self.scene)?;
        if tagged > 0 && self.state.is_connected() {
            self.flush_unsynced();
        }
        Ok(tagged)
    }

    /// Run one replication tick
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        self.scene.begin_tick();
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let mut signals = std::mem::take(&mut self.backlog);
        signals.extend(self.transport.drain());
        for signal in signals {
            match signal {
                TransportSignal::Event(event) => {
                    let outcome = self.apply(&event);
                    if outcome.is_applied() {
                        report.applied += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
                TransportSignal::Disconnected(reason) => self.connection_lost(reason),
            }
        }

        let connected = self.state.is_connected();
        let mut outgoing = match self.uploads.process_ready(self.tick, &mut self.scene, &mut self.cache, connected) {
            Ok(events) => events,
            Err(e) => {
                error!("Upload processing failed: {}", e);
                Vec::new()
            }
        };

        self.focus.retain(|handle| self.scene.contains(*handle));
        outgoing.extend(self.monitor.scan(
            &mut self.scene,
            &self.focus,
            &mut self.cache,
            &self.config.send,
            connected,
        ));

        for event in outgoing {
            match self.send(event) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!("Send failed: {}", e);
                    report.send_failures += 1;
                }
            }
        }

        if !report.is_idle() {
            debug!(
                "Tick {}: applied {}, dropped {}, sent {}, failed {}",
                report.tick, report.applied, report.dropped, report.sent, report.send_failures
            );
        }
        report
    }

    fn apply(&mut self, event: &ChangeEvent) -> ApplyOutcome {
        self.applier.apply(
            &mut self.scene,
            self.assets.as_ref(),
            &mut self.cache,
            &self.config.apply,
            event,
        )
    }

    fn send(&mut self, event: ChangeEvent) -> SyncResult<()> {
        self.clock += 1;
        let event = event.with_timestamp(self.clock).with_sender(self.peer_id.clone());
        self.transport.send(&event)
    }

    fn connection_lost(&mut self, reason: DisconnectReason) {
        if !self.state.is_connected() {
            return;
        }
        warn!("Connection lost: {}", reason);
        self.transport.close();
        self.state = ConnectionState::Disconnected;
    }

    /// Tick that hooks called between ticks belong to
    fn upcoming_tick(&self) -> u64 {
        self.tick + 1
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access for the host's own edits
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Random id stamped as `sender` on every outgoing event
    ///
    /// Store transports replace it with their own origin.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn focus(&self) -> &[EntityHandle] {
        &self.focus
    }

    pub fn cache(&self) -> &LastKnownCache {
        &self.cache
    }

    /// Ticks run so far
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Entities waiting for their first broadcast
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }
}
