//! # Transport Adapters
//!
//! The engine talks to its peers through the [`Transport`] trait. A transport
//! never blocks the tick: `send` hands the event to a background task and
//! `drain` returns whatever arrived since the previous call.
//!
//! Implementations:
//! - [`session::SessionTransport`]: framed JSON over TCP, one connection per peer
//! - [`store::StoreTransport`]: append-only shared event log, polled
//! - [`channel::ChannelTransport`]: in-process pair, for headless peers and tests

pub mod channel;
pub mod session;
pub mod store;

use async_trait::async_trait;
use collab_shared::{ChangeEvent, ConnectionParams, DisconnectReason};

use crate::error::SyncResult;

pub use channel::ChannelTransport;
pub use session::SessionTransport;
pub use store::{EventStore, HttpStore, MemoryStore, StoreTransport};

/// Something a transport observed since the last drain
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// A change event from a peer
    Event(ChangeEvent),

    /// The link went down
    Disconnected(DisconnectReason),
}

/// Message carrier between peers
#[async_trait]
pub trait Transport: Send {
    /// Establish the link
    ///
    /// Fails only if the transport is unavailable outright.
    async fn open(&mut self, params: &ConnectionParams) -> SyncResult<()>;

    /// Tear the link down; further sends fail
    fn close(&mut self);

    /// Queue an event for every peer without waiting on I/O
    fn send(&mut self, event: &ChangeEvent) -> SyncResult<()>;

    /// Everything received since the last call, in arrival order
    fn drain(&mut self) -> Vec<TransportSignal>;
}
