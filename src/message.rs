//! Inbound event frames
//!
//! The console pushes JSON text frames of the form:
//!
//! ```json
//! {"type": "device_status", "data": {"id": 1, "status": "online"}, "timestamp": "2026-01-01T00:00:00Z"}
//! ```
//!
//! Anything that does not decode to this shape is dropped by the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event types broadcast by the console backend.
pub mod event_types {
    pub const DEVICE_STATUS: &str = "device_status";
    pub const ALERT: &str = "alert";
    pub const CONFIG_ACK: &str = "config_ack";
    pub const UPGRADE_ACK: &str = "upgrade_ack";

    /// Everything the backend is known to emit.
    pub const ALL: &[&str] = &[DEVICE_STATUS, ALERT, CONFIG_ACK, UPGRADE_ACK];
}

/// A single realtime event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event type used for handler routing
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload handed to handlers
    #[serde(default)]
    pub data: Value,
    /// ISO-8601 timestamp set by the server
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    /// Decode a text frame; `None` for anything that is not a valid event.
    pub fn parse(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }
}
