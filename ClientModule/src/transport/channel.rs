//! In-process transport pair
//!
//! Two linked endpoints over unbounded channels. Used to run several peers
//! inside one process.

use async_trait::async_trait;
use collab_shared::{ChangeEvent, ConnectionParams, DisconnectReason};
use log::debug;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use super::{Transport, TransportSignal};
use crate::error::{SyncError, SyncResult};

pub struct ChannelTransport {
    outbound: UnboundedSender<ChangeEvent>,
    inbound: UnboundedReceiver<ChangeEvent>,
    open: bool,
    refuse: bool,
    peer_gone_reported: bool,
}

impl ChannelTransport {
    /// Two endpoints wired to each other
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(outbound: UnboundedSender<ChangeEvent>, inbound: UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            outbound,
            inbound,
            open: false,
            refuse: false,
            peer_gone_reported: false,
        }
    }

    /// Make subsequent `open` calls fail, as if the network were down
    pub fn set_refuse_connections(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&mut self, _params: &ConnectionParams) -> SyncResult<()> {
        if self.refuse {
            return Err(SyncError::ConnectFailed("channel refused".to_string()));
        }
        self.open = true;
        self.peer_gone_reported = false;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn send(&mut self, event: &ChangeEvent) -> SyncResult<()> {
        if !self.open {
            return Err(SyncError::NotConnected);
        }
        self.outbound
            .send(event.clone())
            .map_err(|_| SyncError::Transport("peer endpoint dropped".to_string()))
    }

    fn drain(&mut self) -> Vec<TransportSignal> {
        let mut signals = Vec::new();
        loop {
            match self.inbound.try_recv() {
                Ok(event) => signals.push(TransportSignal::Event(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.open && !self.peer_gone_reported {
                        debug!("Channel peer dropped");
                        self.peer_gone_reported = true;
                        signals.push(TransportSignal::Disconnected(DisconnectReason::PeerClosed));
                    }
                    break;
                }
            }
        }
        signals
    }
}
