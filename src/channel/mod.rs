//! Shared realtime event channel
//!
//! One WebSocket per process, shared by every consumer that holds a
//! [`Lease`]. Events are routed to handlers by their `type` field.
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `transport` | Open a WebSocket, yield text frames                     |
//! | `registry`  | Event type to handler index, isolated dispatch          |
//! | `manager`   | Connection task: demand, credential gate, reconnects    |
//! | `lease`     | Per-consumer handle owning its registered handlers      |
//!
//! ```text
//! consumer ──acquire()──► Lease ──on(type, handler)──► HandlerRegistry
//!                           │                               ▲
//!                           └── Acquire/Release ──► ConnectionTask ──frames──┘
//!                                                       │
//!                                                       └── Transport (ws[s]://host/ws?token=…)
//! ```
//!
//! None of the public operations block or fail: they enqueue a command for
//! the connection task and return.

mod lease;
mod manager;
mod registry;
mod transport;

pub use lease::Lease;
pub use manager::{ChannelStatus, ConnectionState, LeaseToken};
pub use registry::{handler, Handler, HandlerRegistry};
pub use transport::{Connector, Transport, WsConnector, WsTransport};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use url::Url;

use crate::backoff::Backoff;
use crate::credential::TokenStore;
use crate::error::{LiveError, Result};
use crate::message::Message;
use manager::{Command, ConnectionTask, Outputs};

/// Path of the event endpoint on the console host.
pub const EVENTS_PATH: &str = "/ws";

/// Where to connect and how to back off.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    secure: bool,
    authority: String,
    pub backoff: Backoff,
}

impl ChannelConfig {
    /// Derive the event endpoint from the console origin.
    ///
    /// `https://` maps to `wss://`, `http://` to `ws://`; the host and any
    /// explicit port are kept, any path is discarded.
    pub fn from_origin(origin: &str) -> Result<Self> {
        let url = Url::parse(origin)
            .map_err(|e| LiveError::Config(format!("Invalid console URL '{}': {}", origin, e)))?;

        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => {
                return Err(LiveError::Config(format!(
                    "Unsupported console URL scheme '{}'",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| LiveError::Config(format!("Console URL '{}' has no host", origin)))?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            secure,
            authority,
            backoff: Backoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Endpoint without credentials, safe to log.
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.authority, EVENTS_PATH)
    }

    /// Full transport URL carrying `token` as a query parameter.
    pub fn transport_url(&self, token: &str) -> String {
        format!("{}?token={}", self.endpoint(), urlencoding::encode(token))
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            secure: false,
            authority: "localhost:8080".to_string(),
            backoff: Backoff::default(),
        }
    }
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<HandlerRegistry>,
    status: watch::Receiver<ChannelStatus>,
    last_message: watch::Receiver<Option<Message>>,
    next_lease: AtomicU64,
}

/// Handle to the shared event channel.
///
/// Cheap to clone. The connection task runs until the last handle (and the
/// last [`Lease`]) is dropped.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Shared>,
}

impl EventChannel {
    /// Start the connection task with a custom connector.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());
        let (message_tx, message_rx) = watch::channel(None);
        let registry = Arc::new(HandlerRegistry::new());

        let task = ConnectionTask::new(
            config,
            connector,
            store,
            Arc::clone(&registry),
            tx.downgrade(),
            Outputs {
                status: status_tx,
                last_message: message_tx,
            },
        );
        tokio::spawn(task.run(rx));

        Self {
            inner: Arc::new(Shared {
                commands: tx,
                registry,
                status: status_rx,
                last_message: message_rx,
                next_lease: AtomicU64::new(0),
            }),
        }
    }

    /// Start the connection task over real WebSockets.
    pub fn websocket(config: ChannelConfig, store: Arc<dyn TokenStore>) -> Self {
        Self::spawn(config, Arc::new(WsConnector), store)
    }

    /// Take a lease. The first outstanding lease triggers a connection
    /// attempt.
    pub fn acquire(&self) -> Lease {
        Lease::new(self.clone())
    }

    /// Ask for a fresh connection attempt after the channel gave up.
    ///
    /// Resets the reconnect budget. Has no effect without leases or while a
    /// transport is connecting or open.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Tell the channel the stored credential changed (login, logout, a
    /// rejected token).
    ///
    /// A transport opened with a token that is no longer stored is closed
    /// right away and the channel connects again with the current token, or
    /// waits for one. Without leases this does nothing.
    pub fn credential_changed(&self) {
        self.send(Command::CredentialChanged);
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.clone()
    }

    /// The most recent well-formed event, if any arrived yet.
    pub fn last_message(&self) -> Option<Message> {
        self.inner.last_message.borrow().clone()
    }

    /// Subscribe to every well-formed event regardless of type.
    pub fn watch_messages(&self) -> watch::Receiver<Option<Message>> {
        self.inner.last_message.clone()
    }

    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Total handler registrations across all leases.
    pub fn handler_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub(crate) fn register_lease(&self) -> LeaseToken {
        let token = LeaseToken(self.inner.next_lease.fetch_add(1, Ordering::Relaxed) + 1);
        self.send(Command::Acquire(token));
        token
    }

    pub(crate) fn release_lease(&self, token: LeaseToken) {
        self.send(Command::Release(token));
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.inner.commands.send(command) {
            debug!(command = ?e.0, "Event channel task is gone, dropping command");
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("status", &*self.inner.status.borrow())
            .field("registry", &self.inner.registry)
            .finish()
    }
}
