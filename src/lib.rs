//! NexusGate Live - realtime event channel for the NexusGate router console
//!
//! One shared WebSocket per process carries the console's push events
//! (device status, alerts, config and upgrade acknowledgements) to any number
//! of consumers, while the bearer token that authorizes it is refreshed ahead
//! of expiry.
//!
//! ## Components
//!
//! - **Channel**: lease-counted shared transport with backoff reconnects
//! - **Credential**: token storage and JWT expiry decoding
//! - **Auth**: login, proactive refresh, and the 401 path
//!
//! ```no_run
//! use std::sync::Arc;
//! use nexusgate_live::{handler, ChannelConfig, EventChannel, MemoryTokenStore};
//!
//! # async fn demo() -> nexusgate_live::Result<()> {
//! let store = Arc::new(MemoryTokenStore::new());
//! let channel = EventChannel::websocket(ChannelConfig::from_origin("http://localhost:8080")?, store);
//!
//! let mut lease = channel.acquire();
//! lease.on("alert", handler(|data| println!("alert: {}", data)));
//! // ... later
//! lease.release();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod backoff;
pub mod channel;
pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod message;
pub mod timer;

pub use auth::{AuthApi, AuthResponse, AuthSession, CredentialRefresher, HttpAuthApi, RefreshPolicy};
pub use backoff::Backoff;
pub use channel::{
    handler, ChannelConfig, ChannelStatus, ConnectionState, EventChannel, Handler, Lease,
};
pub use config::Args;
pub use credential::{Credential, FileTokenStore, MemoryTokenStore, TokenStore};
pub use error::{LiveError, Result};
pub use message::Message;
