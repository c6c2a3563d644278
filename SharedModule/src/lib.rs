//! # SharedModule
//!
//! Wire types and utilities shared by every collaborating peer: the change
//! event schema, its JSON codec and stream framing, math types, connection
//! types and protocol constants.

// Export module structure
pub mod types;
pub mod event;
pub mod codec;
pub mod constants;
pub mod connection;
pub mod error;

// Re-export commonly used items for convenience
pub use types::*;
pub use event::{ChangeEvent, ChangeKind, Payload, PrimitiveShape, SpawnDescriptor};
pub use codec::{decode_event, encode_event, encode_event_frame, FrameReader};
pub use connection::{ConnectionParams, ConnectionState, DisconnectReason};
pub use error::{ProtocolError, ProtocolResult};
