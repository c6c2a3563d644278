//! # Session Transport
//!
//! Direct peer-to-peer exchange over TCP. Every peer listens for incoming
//! connections and, when given a session address, also dials it. Each
//! connection opens with a hello frame carrying the session token; peers
//! presenting a different token are dropped.
//!
//! After the hello, every frame is one JSON change event behind a `u32`
//! big-endian length. Outgoing events are written to every live connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use collab_shared::codec::encode_frame;
use collab_shared::constants::network::MAX_PEERS;
use collab_shared::constants::COLLAB_PROTOCOL_VERSION;
use collab_shared::{
    decode_event, encode_event_frame, ChangeEvent, ConnectionParams, DisconnectReason, FrameReader, ProtocolError,
    ProtocolResult,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::{Transport, TransportSignal};
use crate::config::TransportConfig;
use crate::error::{SyncError, SyncResult};

const READ_CHUNK: usize = 4096;

/// First frame on every connection
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    session: String,
    protocol: String,
}

/// Outgoing queues of the connections that passed the handshake
#[derive(Default)]
struct PeerTable {
    peers: Mutex<HashMap<u64, UnboundedSender<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl PeerTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, UnboundedSender<Vec<u8>>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection; `None` when the session is full
    fn register(&self, sender: UnboundedSender<Vec<u8>>) -> Option<u64> {
        let mut peers = self.lock();
        if peers.len() + 1 >= MAX_PEERS {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        peers.insert(id, sender);
        Some(id)
    }

    /// Drop a connection and return how many remain
    fn remove(&self, id: u64) -> usize {
        let mut peers = self.lock();
        peers.remove(&id);
        peers.len()
    }

    fn broadcast(&self, frame: &[u8]) {
        self.lock().retain(|_, sender| sender.send(frame.to_vec()).is_ok());
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// What every connection task needs
#[derive(Clone)]
struct LinkContext {
    token: String,
    max_frame_bytes: usize,
    table: Arc<PeerTable>,
    inbound: UnboundedSender<TransportSignal>,
}

/// State of an open transport
struct Link {
    local_addr: SocketAddr,
    table: Arc<PeerTable>,
    inbound: UnboundedReceiver<TransportSignal>,
    accept_task: JoinHandle<()>,
}

/// TCP transport connecting the peers of one session directly
pub struct SessionTransport {
    config: TransportConfig,
    link: Option<Link>,
}

impl SessionTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, link: None }
    }

    /// Address the listener is bound to, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.local_addr)
    }

    /// Connections that completed the handshake
    pub fn peer_count(&self) -> usize {
        self.link.as_ref().map_or(0, |link| link.table.len())
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn open(&mut self, params: &ConnectionParams) -> SyncResult<()> {
        self.close();

        let listen_addr = self.config.listen_addr.as_str();
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| SyncError::ConnectFailed(format!("cannot listen on {}: {}", listen_addr, e)))?;
        let local_addr = listener.local_addr()?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let table = Arc::new(PeerTable::default());
        let ctx = LinkContext {
            token: params.session_token.clone(),
            max_frame_bytes: self.config.max_frame_bytes,
            table: table.clone(),
            inbound: inbound_tx,
        };

        if let Some(address) = params.address.as_deref().filter(|a| !a.is_empty()) {
            let stream = TcpStream::connect(address)
                .await
                .map_err(|e| SyncError::ConnectFailed(format!("cannot reach {}: {}", address, e)))?;
            let remote = stream.peer_addr()?;
            info!("Dialed session peer at {}", remote);
            tokio::spawn(run_connection(stream, remote, ctx.clone()));
        }

        let accept_task = tokio::spawn(accept_loop(listener, ctx));
        info!("Session transport listening on {}", local_addr);

        self.link = Some(Link {
            local_addr,
            table,
            inbound: inbound_rx,
            accept_task,
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.accept_task.abort();
            link.table.clear();
            info!("Session transport on {} closed", link.local_addr);
        }
    }

    fn send(&mut self, event: &ChangeEvent) -> SyncResult<()> {
        let link = self.link.as_ref().ok_or(SyncError::NotConnected)?;
        let frame = encode_event_frame(event, self.config.max_frame_bytes)?;
        link.table.broadcast(&frame);
        Ok(())
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

async fn accept_loop(listener: TcpListener, ctx: LinkContext) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!("Incoming connection from {}", remote);
                tokio::spawn(run_connection(stream, remote, ctx.clone()));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn run_connection(stream: TcpStream, remote: SocketAddr, ctx: LinkContext) {
    match serve_connection(stream, remote, &ctx).await {
        Ok(()) => debug!("Connection with {} finished", remote),
        Err(e) => warn!("Connection with {} failed: {}", remote, e),
    }
}

async fn serve_connection(stream: TcpStream, remote: SocketAddr, ctx: &LinkContext) -> SyncResult<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(ctx.max_frame_bytes);
    let mut buf = vec![0u8; READ_CHUNK];

    let hello = Hello {
        session: ctx.token.clone(),
        protocol: COLLAB_PROTOCOL_VERSION.to_string(),
    };
    let hello = serde_json::to_string(&hello).map_err(ProtocolError::from)?;
    writer.write_all(&encode_frame(&hello, ctx.max_frame_bytes)?).await?;

    let Some(greeting) = read_frame(&mut reader, &mut frames, &mut buf).await? else {
        return Ok(());
    };
    let greeting: Hello = serde_json::from_str(&greeting).map_err(ProtocolError::from)?;
    if greeting.session != ctx.token {
        warn!("Rejecting {}: session token mismatch", remote);
        return Ok(());
    }
    if greeting.protocol != COLLAB_PROTOCOL_VERSION {
        warn!("Peer {} speaks protocol {}, we speak {}", remote, greeting.protocol, COLLAB_PROTOCOL_VERSION);
    }

    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();
    let Some(peer_id) = ctx.table.register(outgoing_tx) else {
        warn!("Rejecting {}: session already has {} peers", remote, MAX_PEERS);
        return Ok(());
    };
    info!("Peer {} joined the session", remote);

    let result = pump(&mut reader, &mut writer, &mut outgoing_rx, &mut frames, &mut buf, remote, ctx).await;

    if ctx.table.remove(peer_id) == 0 {
        info!("Last session peer ({}) left", remote);
        let _ = ctx.inbound.send(TransportSignal::Disconnected(DisconnectReason::PeerClosed));
    }
    result
}

/// Move frames in both directions until either side closes
async fn pump(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    outgoing: &mut UnboundedReceiver<Vec<u8>>,
    frames: &mut FrameReader,
    buf: &mut [u8],
    remote: SocketAddr,
    ctx: &LinkContext,
) -> SyncResult<()> {
    loop {
        while let Some(frame) = frames.next_frame() {
            deliver(frame, remote, ctx);
        }

        tokio::select! {
            next = outgoing.recv() => match next {
                Some(bytes) => writer.write_all(&bytes).await?,
                None => return Ok(()),
            },
            read = reader.read(buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                frames.push(&buf[..n]);
            }
        }
    }
}

fn deliver(frame: ProtocolResult<String>, remote: SocketAddr, ctx: &LinkContext) {
    match frame.and_then(|body| decode_event(&body)) {
        Ok(event) => {
            let _ = ctx.inbound.send(TransportSignal::Event(event));
        }
        Err(e) => warn!("Dropping malformed frame from {}: {}", remote, e),
    }
}

async fn read_frame(
    reader: &mut OwnedReadHalf,
    frames: &mut FrameReader,
    buf: &mut [u8],
) -> SyncResult<Option<String>> {
    loop {
        if let Some(frame) = frames.next_frame() {
            return Ok(Some(frame?));
        }
        let n = reader.read(buf).await?;
        if n == 0 {
            return Ok(None);
        }
        frames.push(&buf[..n]);
    }
}
