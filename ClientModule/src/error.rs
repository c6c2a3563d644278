//! # Sync Errors
//!
//! Almost every failure inside the engine is handled where it happens
//! (dropped message, placeholder spawn, skipped poll). `SyncError` is what
//! those places log, and what the few fallible entry points return.

use collab_shared::ProtocolError;
use thiserror::Error;

use crate::scene::EntityHandle;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("unknown entity handle {0}")]
    UnknownHandle(EntityHandle),

    #[error("invalid config: {0}")]
    Config(String),
}

/// Result type for engine operations
pub type SyncResult<T> = Result<T, SyncError>;
