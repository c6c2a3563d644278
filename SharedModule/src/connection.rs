//! # Connection Types
//!
//! Connection-related types shared by every transport. Session management
//! itself (lobbies, relay allocation, join codes) lives outside the sync
//! engine; it only hands over an address and a session token.

use std::fmt;

use serde::{Serialize, Deserialize};

/// State of the link to the other peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected; local edits go to the offline buffer
    Disconnected,

    /// Transport is being opened
    Connecting,

    /// Connected; local edits are broadcast
    Connected,

    /// The last connection attempt failed
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Parameters handed over by the session layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Peer to dial, `None` to only listen. Store transports take their
    /// base URL from configuration and ignore this.
    pub address: Option<String>,

    /// Session this peer belongs to; also names the store path
    pub session_token: String,
}

impl ConnectionParams {
    pub fn new(address: Option<String>, session_token: impl Into<String>) -> Self {
        Self {
            address,
            session_token: session_token.into(),
        }
    }
}

/// The reason for a disconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Normal disconnection by local request
    ClientRequest,

    /// Every remote peer went away
    PeerClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientRequest => f.write_str("closed by client"),
            DisconnectReason::PeerClosed => f.write_str("all peers closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_serialize_as_bare_names() {
        assert_eq!(serde_json::to_string(&DisconnectReason::PeerClosed).unwrap(), "\"PeerClosed\"");
        let reason: DisconnectReason = serde_json::from_str("\"ClientRequest\"").unwrap();
        assert_eq!(reason, DisconnectReason::ClientRequest);
        assert!(serde_json::from_str::<DisconnectReason>("\"Unknown\"").is_err());
    }

    #[test]
    fn only_connected_counts_as_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Failed.is_connected());
    }
}
