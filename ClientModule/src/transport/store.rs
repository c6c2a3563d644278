//! # Store Transport
//!
//! Relays events through a shared append-only log, such as a realtime
//! database, instead of connecting peers directly. Every peer appends its
//! events under the session's path and polls the most recent entries.
//!
//! `create` events are appended at once. Field updates are coalesced per
//! entity and kind, last value wins, and written on the poll cadence. Each
//! poll skips entries this peer already saw or wrote. The seen keys outlive
//! a reconnect to the same session and are trimmed to the replay window.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use collab_shared::{decode_event, ChangeEvent, ChangeKind, ConnectionParams};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::{Transport, TransportSignal};
use crate::config::TransportConfig;
use crate::error::{SyncError, SyncResult};

/// One entry of the shared log
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Store-assigned key; keys sort in append order
    pub key: String,

    pub event: ChangeEvent,
}

/// Append-only event log shared by the peers of a session
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `event` and return the key it was stored under
    async fn append(&self, session: &str, event: &ChangeEvent) -> SyncResult<String>;

    /// The latest `limit` entries, oldest first
    async fn recent(&self, session: &str, limit: usize) -> SyncResult<Vec<StoredEvent>>;
}

/// Realtime-database style REST store
///
/// Events live under `{base_url}/sessions/{session}/events.json`. A `POST`
/// appends and answers with the generated key; a `GET` ordered by key with
/// `limitToLast` returns the tail of the log as a key-to-event object.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn events_url(&self, session: &str) -> String {
        format!("{}/sessions/{}/events.json", self.base_url.trim_end_matches('/'), session)
    }
}

#[async_trait]
impl EventStore for HttpStore {
    async fn append(&self, session: &str, event: &ChangeEvent) -> SyncResult<String> {
        let response = self
            .client
            .post(self.events_url(session))
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        let pushed: PushResponse = response.json().await?;
        Ok(pushed.name)
    }

    async fn recent(&self, session: &str, limit: usize) -> SyncResult<Vec<StoredEvent>> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(self.events_url(session))
            .query(&[("orderBy", "\"$key\""), ("limitToLast", limit.as_str())])
            .send()
            .await?
            .error_for_status()?;

        // An empty session comes back as `null`
        let entries: Option<BTreeMap<String, serde_json::Value>> = response.json().await?;
        let mut events = Vec::new();
        for (key, value) in entries.unwrap_or_default() {
            match decode_event(&value.to_string()) {
                Ok(event) => events.push(StoredEvent { key, event }),
                Err(e) => warn!("Skipping malformed store entry {}: {}", key, e),
            }
        }
        Ok(events)
    }
}

/// In-process store; clones share the same log
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<Mutex<HashMap<String, Vec<StoredEvent>>>>,
    next_key: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until reset, as an unreachable backend would
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every entry of `session`, oldest first
    pub fn entries(&self, session: &str) -> Vec<StoredEvent> {
        self.lock().get(session).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<StoredEvent>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SyncError::Transport("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, session: &str, event: &ChangeEvent) -> SyncResult<String> {
        self.check()?;
        let key = format!("{:020}", self.next_key.fetch_add(1, Ordering::SeqCst));
        self.lock()
            .entry(session.to_string())
            .or_default()
            .push(StoredEvent { key: key.clone(), event: event.clone() });
        Ok(key)
    }

    async fn recent(&self, session: &str, limit: usize) -> SyncResult<Vec<StoredEvent>> {
        self.check()?;
        let sessions = self.lock();
        let log = sessions.get(session).map(Vec::as_slice).unwrap_or(&[]);
        Ok(log[log.len().saturating_sub(limit)..].to_vec())
    }
}

/// Latest pending event per entity and kind, in first-seen order
#[derive(Default)]
struct Coalescer {
    order: Vec<(String, ChangeKind)>,
    latest: HashMap<(String, ChangeKind), ChangeEvent>,
}

impl Coalescer {
    fn push(&mut self, event: ChangeEvent) {
        let key = (event.entity_id.clone(), event.kind);
        if !self.latest.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.latest.insert(key, event);
    }

    fn take(&mut self) -> Vec<ChangeEvent> {
        let latest = &mut self.latest;
        self.order.drain(..).filter_map(|key| latest.remove(&key)).collect()
    }
}

/// Keys already delivered or written, for one session
#[derive(Default)]
struct SeenKeys {
    session: String,
    keys: HashSet<String>,
}

fn lock_seen(seen: &Mutex<SeenKeys>) -> MutexGuard<'_, SeenKeys> {
    seen.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StoreLink {
    outgoing: UnboundedSender<ChangeEvent>,
    inbound: UnboundedReceiver<TransportSignal>,
    task: JoinHandle<()>,
}

/// Transport over an [`EventStore`]
pub struct StoreTransport {
    store: Arc<dyn EventStore>,
    config: TransportConfig,
    origin: String,
    seen: Arc<Mutex<SeenKeys>>,
    link: Option<StoreLink>,
}

impl StoreTransport {
    pub fn new(store: Arc<dyn EventStore>, config: TransportConfig) -> Self {
        Self {
            store,
            config,
            origin: Uuid::new_v4().to_string(),
            seen: Arc::default(),
            link: None,
        }
    }

    /// Store transport over HTTP at `config.store_base_url`
    pub fn http(config: TransportConfig) -> Self {
        let store = Arc::new(HttpStore::new(config.store_base_url.clone()));
        Self::new(store, config)
    }

    /// Use `origin` as the sender stamped on outgoing events
    ///
    /// Every outgoing event carries this origin, whatever sender it had, so
    /// the relay can recognise its own entries after a reconnect.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl Drop for StoreTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Transport for StoreTransport {
    async fn open(&mut self, params: &ConnectionParams) -> SyncResult<()> {
        self.close();

        let session = params.session_token.clone();
        if session.is_empty() {
            return Err(SyncError::ConnectFailed("store session name is empty".to_string()));
        }
        self.store
            .recent(&session, 1)
            .await
            .map_err(|e| SyncError::ConnectFailed(format!("store unreachable: {}", e)))?;

        {
            let mut seen = lock_seen(&self.seen);
            if seen.session != session {
                seen.session = session.clone();
                seen.keys.clear();
            }
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let relay = StoreRelay {
            store: self.store.clone(),
            session,
            origin: self.origin.clone(),
            replay_limit: self.config.replay_limit,
            pending: Coalescer::default(),
            seen: self.seen.clone(),
            inbound: inbound_tx,
        };
        let task = tokio::spawn(relay.run(outgoing_rx, self.config.poll_interval()));
        info!("Store transport joined session {}", params.session_token);

        self.link = Some(StoreLink {
            outgoing: outgoing_tx,
            inbound: inbound_rx,
            task,
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
            info!("Store transport closed");
        }
    }

    fn send(&mut self, event: &ChangeEvent) -> SyncResult<()> {
        let link = self.link.as_ref().ok_or(SyncError::NotConnected)?;
        let event = event.clone().with_sender(self.origin.clone());
        link.outgoing
            .send(event)
            .map_err(|_| SyncError::Transport("store relay stopped".to_string()))
    }

    fn drain(&mut self) -> Vec<TransportSignal> {
        let mut signals = Vec::new();
        if let Some(link) = self.link.as_mut() {
            while let Ok(signal) = link.inbound.try_recv() {
                signals.push(signal);
            }
        }
        signals
    }
}

/// Background side of a [`StoreTransport`]
struct StoreRelay {
    store: Arc<dyn EventStore>,
    session: String,
    origin: String,
    replay_limit: usize,
    pending: Coalescer,
    seen: Arc<Mutex<SeenKeys>>,
    inbound: UnboundedSender<TransportSignal>,
}

impl StoreRelay {
    async fn run(mut self, mut outgoing: UnboundedReceiver<ChangeEvent>, poll_interval: std::time::Duration) {
        let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                next = outgoing.recv() => match next {
                    Some(event) if event.kind == ChangeKind::Create => {
                        self.flush().await;
                        self.append(&event).await;
                    }
                    Some(event) => self.pending.push(event),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush().await;
                    self.poll().await;
                }
            }
        }
        debug!("Store relay for session {} stopped", self.session);
    }

    async fn flush(&mut self) {
        for event in self.pending.take() {
            self.append(&event).await;
        }
    }

    async fn append(&mut self, event: &ChangeEvent) {
        match self.store.append(&self.session, event).await {
            Ok(key) => {
                lock_seen(&self.seen).keys.insert(key);
            }
            Err(e) => warn!("Failed to append {} for {}: {}", event.kind, event.entity_id, e),
        }
    }

    async fn poll(&mut self) {
        let entries = match self.store.recent(&self.session, self.replay_limit).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Store poll failed, skipping cycle: {}", e);
                return;
            }
        };

        let oldest = entries.first().map(|entry| entry.key.clone());
        let mut seen = lock_seen(&self.seen);
        for entry in entries {
            if !seen.keys.insert(entry.key) {
                continue;
            }
            if entry.event.sender.as_deref() == Some(self.origin.as_str()) {
                continue;
            }
            let _ = self.inbound.send(TransportSignal::Event(entry.event));
        }

        // Keys older than the window can never be returned again
        if let Some(oldest) = oldest {
            seen.keys.retain(|key| *key >= oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_shared::{PrimitiveShape, Rotator, SpawnDescriptor, Vector3};
    use std::time::Duration;

    const SESSION: &str = "demo";

    fn fast_config() -> TransportConfig {
        TransportConfig {
            poll_interval_ms: 20,
            ..TransportConfig::default()
        }
    }

    async fn open_peer(store: &MemoryStore) -> StoreTransport {
        let mut transport = StoreTransport::new(Arc::new(store.clone()), fast_config());
        transport.open(&ConnectionParams::new(None, SESSION)).await.unwrap();
        transport
    }

    fn create(id: &str) -> ChangeEvent {
        ChangeEvent::create(id, SpawnDescriptor::primitive(PrimitiveShape::Cube), Vector3::zero(), Rotator::zero(), Vector3::one())
    }

    #[tokio::test]
    async fn updates_are_coalesced_per_entity_and_kind() {
        let store = MemoryStore::new();
        let mut peer = open_peer(&store).await;

        peer.send(&ChangeEvent::field(ChangeKind::Transform, "e1", "1,0,0")).unwrap();
        peer.send(&ChangeEvent::field(ChangeKind::Transform, "e1", "2,0,0")).unwrap();
        peer.send(&ChangeEvent::field(ChangeKind::Scale, "e1", "2,2,2")).unwrap();
        peer.send(&ChangeEvent::field(ChangeKind::Transform, "e1", "3,0,0")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let payloads: Vec<_> = store.entries(SESSION).into_iter().map(|e| e.event.payload).collect();
        assert_eq!(payloads, vec!["3,0,0".to_string(), "2,2,2".to_string()]);
    }

    #[tokio::test]
    async fn creates_are_appended_immediately() {
        let store = MemoryStore::new();
        let mut peer = open_peer(&store).await;
        peer.send(&create("c1")).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.entries(SESSION).len(), 1);
    }

    #[tokio::test]
    async fn peers_see_each_other_but_not_themselves() {
        let store = MemoryStore::new();
        let mut a = open_peer(&store).await;
        let mut b = open_peer(&store).await;

        a.send(&create("c1")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let received = b.drain();
        assert_eq!(received.len(), 1);
        match &received[0] {
            TransportSignal::Event(event) => {
                assert_eq!(event.entity_id, "c1");
                assert_eq!(event.sender.as_deref(), Some(a.origin()));
            }
            other => panic!("unexpected signal {:?}", other),
        }
        assert!(a.drain().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn outgoing_events_carry_the_transport_origin() {
        let store = MemoryStore::new();
        let mut peer = open_peer(&store).await;
        peer.send(&create("c1").with_sender("engine-peer")).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let entries = store.entries(SESSION);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.sender.as_deref(), Some(peer.origin()));
    }

    #[tokio::test]
    async fn reopening_does_not_replay_old_entries() {
        let store = MemoryStore::new();
        let mut a = open_peer(&store).await;
        let mut b = open_peer(&store).await;

        a.send(&create("c1")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(b.drain().len(), 1);

        let params = ConnectionParams::new(None, SESSION);
        a.close();
        b.close();
        a.open(&params).await.unwrap();
        b.open(&params).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn joining_another_session_starts_fresh() {
        let store = MemoryStore::new();
        store.append("other", &create("c1")).await.unwrap();
        let mut peer = open_peer(&store).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(peer.drain().is_empty());

        peer.open(&ConnectionParams::new(None, "other")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(peer.drain().len(), 1);
    }

    #[tokio::test]
    async fn seen_keys_stay_within_the_replay_window() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.append(SESSION, &create(&format!("c{}", i))).await.unwrap();
        }
        let config = TransportConfig {
            replay_limit: 3,
            ..fast_config()
        };
        let mut peer = StoreTransport::new(Arc::new(store.clone()), config);
        peer.open(&ConnectionParams::new(None, SESSION)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(peer.drain().len(), 3);

        for i in 10..15 {
            store.append(SESSION, &create(&format!("c{}", i))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert_eq!(peer.drain().len(), 5);
        assert!(lock_seen(&peer.seen).keys.len() <= 3);
    }

    #[tokio::test]
    async fn store_outage_skips_cycles_without_stopping() {
        let store = MemoryStore::new();
        let mut a = open_peer(&store).await;
        let mut b = open_peer(&store).await;

        store.set_failing(true);
        a.send(&ChangeEvent::field(ChangeKind::Transform, "e1", "1,0,0")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(b.drain().is_empty());

        store.set_failing(false);
        a.send(&ChangeEvent::field(ChangeKind::Transform, "e1", "2,0,0")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let received = b.drain();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn open_fails_when_store_is_down() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let mut transport = StoreTransport::new(Arc::new(store), fast_config());
        let result = transport.open(&ConnectionParams::new(None, SESSION)).await;
        assert!(matches!(result, Err(SyncError::ConnectFailed(_))));
        assert!(matches!(
            transport.send(&create("c1")),
            Err(SyncError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn replay_window_is_limited() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append(SESSION, &create(&format!("c{}", i))).await.unwrap();
        }
        let tail = store.recent(SESSION, 2).await.unwrap();
        let ids: Vec<_> = tail.iter().map(|e| e.event.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c4"]);
    }

    #[test]
    fn http_paths_are_scoped_by_session() {
        let store = HttpStore::new("https://example.firebasedatabase.app/");
        assert_eq!(
            store.events_url("room"),
            "https://example.firebasedatabase.app/sessions/room/events.json"
        );
    }
}
