//! # Shared Constants
//!
//! Defaults agreed on by every peer. Runtime configuration may override the
//! thresholds, but peers that disagree on them will still converge because
//! every write is last-writer-wins.

/// Protocol version string
pub const COLLAB_PROTOCOL_VERSION: &str = "0.1.0";

/// Change detection thresholds
pub mod thresholds {
    /// Minimum position change, in distance units
    pub const POSITION_EPSILON: f32 = 0.01;

    /// Minimum rotation change, in degrees
    pub const ROTATION_EPSILON_DEGREES: f32 = 0.5;

    /// Minimum scale change, in distance units
    pub const SCALE_EPSILON: f32 = 0.01;
}

/// Entity naming conventions
pub mod naming {
    /// Prefix for entities spawned from a primitive descriptor
    pub const NETWORK_OBJECT_PREFIX: &str = "NetObj_";

    /// Prefix for placeholders standing in for an unresolvable asset
    pub const MISSING_ASSET_PREFIX: &str = "MISSING: ";

    /// Entities whose name starts with this are never tracked
    pub const SYSTEM_OBJECT_PREFIX: &str = "_";
}

/// Network constants
pub mod network {
    /// Largest message frame, in bytes
    pub const MAX_FRAME_BYTES: usize = 4096;

    /// Maximum peers in one session
    pub const MAX_PEERS: usize = 4;

    /// Store transport poll interval, in milliseconds
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;

    /// Number of most recent store entries replayed on every poll
    pub const DEFAULT_REPLAY_LIMIT: usize = 50;

    /// Tick loop interval, in milliseconds
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;
}
