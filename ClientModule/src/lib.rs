//! # Collab Client Module
//!
//! Peer-side replication engine for collaborative scene editing. Every peer
//! runs one [`SyncEngine`]: it watches local edits, broadcasts them as
//! change events, and applies the events other peers broadcast. There is no
//! central authority; concurrent writes resolve last-writer-wins.
//!
//! The system is organized into several sub-modules:
//! - `scene`: Local entity model and origin-tagged field writes
//! - `identity`: Replication ids and clone healing
//! - `monitor`: Local change detection with per-field thresholds
//! - `upload`: Deferred full-state broadcast of new entities
//! - `apply`: Inbound events, including spawning unknown entities
//! - `transport`: Session (TCP), store (HTTP log) and in-process carriers
//! - `engine`: The per-peer context tying the above together
//! - `scheduler`: Fixed-cadence tick loop

// Module declarations
pub mod error;       // Error type
pub mod config;      // Runtime configuration
pub mod scene;       // Entity model
pub mod assets;      // Asset library seam
pub mod identity;    // Id assignment and clone healing
pub mod tagging;     // Which entities replicate
pub mod cache;       // Last-known field values
pub mod monitor;     // Local change detection
pub mod upload;      // Pending uploads
pub mod apply;       // Remote event application
pub mod transport;   // Message carriers
pub mod engine;      // Per-peer context
pub mod scheduler;   // Tick loop

// Re-export commonly used items
pub use apply::{ApplyEngine, ApplyOutcome};
pub use assets::{AssetLibrary, MemoryAssetLibrary};
pub use config::{SyncConfig, Thresholds, TransportConfig};
pub use engine::{SyncEngine, TickReport};
pub use error::{SyncError, SyncResult};
pub use identity::{assign_identity, ensure_identity, IdentityOutcome};
pub use scene::{Entity, EntityHandle, EntityRole, EntitySource, Origin, Scene, UniqueId};
pub use transport::{ChannelTransport, SessionTransport, StoreTransport, Transport, TransportSignal};
