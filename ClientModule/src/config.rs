//! # Sync Configuration
//!
//! Runtime settings for one peer. Every field has a default, so a config
//! file only needs the values it changes:
//!
//! ```json
//! { "send": { "position": 0.02 }, "transport": { "listen_addr": "0.0.0.0:7777" } }
//! ```

use std::path::Path;
use std::time::Duration;

use collab_shared::constants::{network, thresholds};
use collab_shared::{Rotator, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Per-field change thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum position distance
    pub position: f32,

    /// Minimum rotation angle, in degrees
    pub rotation_degrees: f32,

    /// Minimum scale distance
    pub scale: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            position: thresholds::POSITION_EPSILON,
            rotation_degrees: thresholds::ROTATION_EPSILON_DEGREES,
            scale: thresholds::SCALE_EPSILON,
        }
    }
}

impl Thresholds {
    pub fn position_changed(&self, old: &Vector3, new: &Vector3) -> bool {
        old.distance(new) > self.position
    }

    pub fn rotation_changed(&self, old: &Rotator, new: &Rotator) -> bool {
        old.angle_to(new) > self.rotation_degrees
    }

    pub fn scale_changed(&self, old: &Vector3, new: &Vector3) -> bool {
        old.distance(new) > self.scale
    }

    pub fn material_changed(&self, old: &str, new: &str) -> bool {
        old != new
    }
}

/// Transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address the session transport listens on
    pub listen_addr: String,

    /// Largest frame accepted or sent
    pub max_frame_bytes: usize,

    /// Store transport poll interval
    pub poll_interval_ms: u64,

    /// Store transport replay window
    pub replay_limit: usize,

    /// Store transport base URL, e.g. a realtime database root
    pub store_base_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            max_frame_bytes: network::MAX_FRAME_BYTES,
            poll_interval_ms: network::DEFAULT_POLL_INTERVAL_MS,
            replay_limit: network::DEFAULT_REPLAY_LIMIT,
            store_base_url: String::new(),
        }
    }
}

impl TransportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level peer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Thresholds used by the change monitor
    pub send: Thresholds,

    /// Thresholds used when applying remote events
    pub apply: Thresholds,

    pub transport: TransportConfig,

    /// Tick loop interval
    pub tick_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send: Thresholds::default(),
            apply: Thresholds::default(),
            transport: TransportConfig::default(),
            tick_interval_ms: network::DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config, filling unspecified fields with defaults
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn validate(&self) -> SyncResult<()> {
        for (name, t) in [("send", &self.send), ("apply", &self.apply)] {
            if t.position < 0.0 || t.rotation_degrees < 0.0 || t.scale < 0.0 {
                return Err(SyncError::Config(format!("{} thresholds must not be negative", name)));
            }
        }
        if self.transport.max_frame_bytes == 0 {
            return Err(SyncError::Config("max_frame_bytes must be positive".to_string()));
        }
        if self.tick_interval_ms == 0 || self.transport.poll_interval_ms == 0 {
            return Err(SyncError::Config("intervals must be positive".to_string()));
        }
        Ok(())
    }
}
