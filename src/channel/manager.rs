//! Connection task
//!
//! Single responsibility: own the one shared transport and decide when it
//! should exist.
//!
//! # Architecture
//!
//! ```text
//!  EventChannel / Lease ──┐
//!  retry timers ──────────┼──► Command queue ──► ConnectionTask ──► HandlerRegistry
//!  link task (transport) ─┘                           │
//!                                                     └──► watch: ChannelStatus, last message
//! ```
//!
//! Every input (lease changes, timer fires, transport lifecycle events) is a
//! [`Command`] processed one at a time by a single task, so the state below is
//! never shared and dispatches never interleave.
//!
//! # Rules
//!
//! - A transport exists only while at least one lease is outstanding and a
//!   credential is stored.
//! - An unplanned close with demand schedules a reconnect after
//!   `backoff.delay(attempts)`; an open resets `attempts` to zero.
//! - After `backoff.max_attempts` consecutive failures the task gives up and
//!   publishes [`ConnectionState::GaveUp`].
//! - A missing credential schedules a credential-wait retry with its own
//!   counter; it never consumes the reconnect budget.
//! - Draining the last lease closes the transport, cancels any pending retry
//!   and resets both counters.
//! - A credential change closes a transport opened with a token that is no
//!   longer stored, then connects again with the current one (or waits for
//!   one). This is a planned close and never counts against the budget.
//!
//! Retries carry a generation number. A timer that fires after being
//! superseded is ignored, so cancellation is exact even if the fire raced
//! with the cancel.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::registry::HandlerRegistry;
use super::transport::Connector;
use super::ChannelConfig;
use crate::credential::{Credential, TokenStore};
use crate::message::Message;
use crate::timer::ScheduledTask;

/// Identifies one lease on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseToken(pub(crate) u64);

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// Lifecycle of the shared transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No demand, or demand waiting for a credential
    Idle,
    /// Transport is being opened
    Connecting,
    /// Transport is open and delivering events
    Open,
    /// Transport closed; a reconnect may be pending
    Closed,
    /// Reconnect budget exhausted; nothing is pending until
    /// `EventChannel::reconnect()` or a new demand period
    GaveUp,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::GaveUp => "gave_up",
        };
        f.write_str(s)
    }
}

/// Snapshot of the connection task, published after every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Outstanding leases
    pub leases: usize,
    /// Consecutive unplanned closes since the last open
    pub reconnect_attempts: u32,
    /// Consecutive attempts that found no credential
    pub credential_waits: u32,
    /// Whether a reconnect or credential-wait retry is armed
    pub retry_pending: bool,
    /// Transports created over the lifetime of the channel
    pub transports_created: u64,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            leases: 0,
            reconnect_attempts: 0,
            credential_waits: 0,
            retry_pending: false,
            transports_created: 0,
        }
    }
}

/// Inputs to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Acquire(LeaseToken),
    Release(LeaseToken),
    Reconnect,
    CredentialChanged,
    RetryDue { generation: u64 },
    Link { link: u64, event: LinkEvent },
}

/// Lifecycle events reported by a link task.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    Opened,
    Frame(String),
    Failed(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    Reconnect,
    AwaitingCredential,
}

struct PendingRetry {
    generation: u64,
    reason: RetryReason,
    task: ScheduledTask,
}

/// The connection task's handle on its current link task.
struct Link {
    id: u64,
    token: String,
    close_tx: Option<oneshot::Sender<()>>,
}

impl Link {
    fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Watch channels the connection task publishes to.
pub(crate) struct Outputs {
    pub status: watch::Sender<ChannelStatus>,
    pub last_message: watch::Sender<Option<Message>>,
}

pub(crate) struct ConnectionTask {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn TokenStore>,
    registry: Arc<HandlerRegistry>,
    commands: mpsc::WeakUnboundedSender<Command>,
    outputs: Outputs,

    leases: HashSet<LeaseToken>,
    state: ConnectionState,
    link: Option<Link>,
    next_link: u64,
    transports_created: u64,
    reconnect_attempts: u32,
    credential_waits: u32,
    retry: Option<PendingRetry>,
    next_generation: u64,
}

impl ConnectionTask {
    pub(crate) fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn TokenStore>,
        registry: Arc<HandlerRegistry>,
        commands: mpsc::WeakUnboundedSender<Command>,
        outputs: Outputs,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            registry,
            commands,
            outputs,
            leases: HashSet::new(),
            state: ConnectionState::Idle,
            link: None,
            next_link: 0,
            transports_created: 0,
            reconnect_attempts: 0,
            credential_waits: 0,
            retry: None,
            next_generation: 0,
        }
    }

    /// Process commands until every channel handle has been dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(endpoint = %self.config.endpoint(), "Event channel task started");

        while let Some(command) = commands.recv().await {
            self.handle(command);
            self.publish();
        }

        self.cancel_retry();
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        debug!("Event channel task stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Acquire(token) => self.on_acquire(token),
            Command::Release(token) => self.on_release(token),
            Command::Reconnect => self.on_reconnect_requested(),
            Command::CredentialChanged => self.on_credential_changed(),
            Command::RetryDue { generation } => self.on_retry_due(generation),
            Command::Link { link, event } => self.on_link_event(link, event),
        }
    }

    fn publish(&self) {
        let status = ChannelStatus {
            state: self.state,
            leases: self.leases.len(),
            reconnect_attempts: self.reconnect_attempts,
            credential_waits: self.credential_waits,
            retry_pending: self.retry.is_some(),
            transports_created: self.transports_created,
        };
        self.outputs.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    // ── demand ───────────────────────────────────────────────────────────

    fn on_acquire(&mut self, token: LeaseToken) {
        let first = self.leases.is_empty();
        if !self.leases.insert(token) {
            return;
        }
        debug!(lease = %token, leases = self.leases.len(), "Lease acquired");

        if first {
            self.attempt_connect();
        }
    }

    fn on_release(&mut self, token: LeaseToken) {
        if !self.leases.remove(&token) {
            debug!(lease = %token, "Ignoring release of unknown lease");
            return;
        }
        debug!(lease = %token, leases = self.leases.len(), "Lease released");

        if self.leases.is_empty() {
            self.disconnect();
        }
    }

    fn disconnect(&mut self) {
        self.cancel_retry();
        if let Some(mut link) = self.link.take() {
            info!(link = link.id, "No leases left, closing transport");
            link.close();
        }
        self.reconnect_attempts = 0;
        self.credential_waits = 0;
        self.state = ConnectionState::Idle;
    }

    fn on_reconnect_requested(&mut self) {
        if self.leases.is_empty() || self.link.is_some() {
            return;
        }
        info!(previous = %self.state, "Reconnect requested");
        self.cancel_retry();
        self.reconnect_attempts = 0;
        self.credential_waits = 0;
        self.state = ConnectionState::Idle;
        self.attempt_connect();
    }

    fn on_credential_changed(&mut self) {
        if self.leases.is_empty() {
            return;
        }

        let current = Credential::load(self.store.as_ref());
        if let Some(link) = self.link.as_mut() {
            if current.as_ref().map(Credential::raw_token) == Some(link.token.as_str()) {
                return;
            }
            info!(link = link.id, "Stored credential changed, closing transport");
            // Its remaining events are ignored once it is no longer current.
            link.close();
            self.link = None;
        } else if current.is_none() && self.retry.is_some() {
            // Already waiting; nothing new to try.
            return;
        }

        self.cancel_retry();
        self.reconnect_attempts = 0;
        self.credential_waits = 0;
        self.state = ConnectionState::Idle;
        self.attempt_connect();
    }

    // ── connecting ───────────────────────────────────────────────────────

    fn attempt_connect(&mut self) {
        if self.leases.is_empty() || self.link.is_some() {
            return;
        }

        let Some(credential) = Credential::load(self.store.as_ref()) else {
            let delay = self.config.backoff.delay(self.credential_waits);
            self.credential_waits = self.credential_waits.saturating_add(1);
            debug!(
                waits = self.credential_waits,
                delay_ms = delay.as_millis() as u64,
                "No credential stored, retrying later"
            );
            self.schedule_retry(RetryReason::AwaitingCredential, delay);
            return;
        };

        self.credential_waits = 0;
        self.open_link(credential.raw_token());
    }

    fn open_link(&mut self, token: &str) {
        self.next_link += 1;
        let id = self.next_link;
        let url = self.config.transport_url(token);
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(run_link(
            id,
            Arc::clone(&self.connector),
            url,
            self.commands.clone(),
            close_rx,
        ));

        self.link = Some(Link {
            id,
            token: token.to_string(),
            close_tx: Some(close_tx),
        });
        self.transports_created += 1;
        self.state = ConnectionState::Connecting;
        debug!(link = id, endpoint = %self.config.endpoint(), "Opening transport");
    }

    fn schedule_retry(&mut self, reason: RetryReason, delay: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let commands = self.commands.clone();

        let task = ScheduledTask::after(delay, async move {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::RetryDue { generation });
            }
        });

        // Replacing an armed retry drops (and so cancels) it
        self.retry = Some(PendingRetry {
            generation,
            reason,
            task,
        });
    }

    fn cancel_retry(&mut self) {
        if let Some(mut retry) = self.retry.take() {
            retry.task.cancel();
            trace!(reason = ?retry.reason, generation = retry.generation, "Retry cancelled");
        }
    }

    fn on_retry_due(&mut self, generation: u64) {
        match &self.retry {
            Some(retry) if retry.generation == generation => {}
            _ => {
                trace!(generation, "Ignoring superseded retry");
                return;
            }
        }
        self.retry = None;
        self.attempt_connect();
    }

    // ── transport lifecycle ──────────────────────────────────────────────

    fn on_link_event(&mut self, link: u64, event: LinkEvent) {
        if self.link.as_ref().map(|l| l.id) != Some(link) {
            trace!(link, "Ignoring event from retired transport");
            return;
        }

        match event {
            LinkEvent::Opened => {
                self.state = ConnectionState::Open;
                self.reconnect_attempts = 0;
                self.cancel_retry();
                info!(link, "Event channel connected");
            }
            LinkEvent::Frame(frame) => self.deliver(&frame),
            LinkEvent::Failed(reason) => {
                warn!(link, error = %reason, "Transport error, closing");
                if let Some(current) = self.link.as_mut() {
                    current.close();
                }
            }
            LinkEvent::Closed => self.on_closed(link),
        }
    }

    fn deliver(&mut self, frame: &str) {
        let Some(message) = Message::parse(frame) else {
            debug!(bytes = frame.len(), "Discarding malformed frame");
            return;
        };

        self.outputs.last_message.send_replace(Some(message.clone()));
        let delivered = self.registry.dispatch(&message);
        trace!(event_type = %message.event_type, delivered, "Event dispatched");
    }

    fn on_closed(&mut self, link: u64) {
        self.link = None;
        self.state = ConnectionState::Closed;

        if self.leases.is_empty() {
            return;
        }

        let backoff = self.config.backoff;
        if !backoff.allows(self.reconnect_attempts) {
            self.state = ConnectionState::GaveUp;
            warn!(
                attempts = self.reconnect_attempts,
                "Reconnect budget exhausted, giving up"
            );
            return;
        }

        let delay = backoff.delay(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        info!(
            link,
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Transport closed, scheduling reconnect"
        );
        self.schedule_retry(RetryReason::Reconnect, delay);
    }
}

/// Send a link event to the connection task. Returns `false` once it is gone.
fn emit(commands: &mpsc::WeakUnboundedSender<Command>, link: u64, event: LinkEvent) -> bool {
    match commands.upgrade() {
        Some(tx) => tx.send(Command::Link { link, event }).is_ok(),
        None => false,
    }
}

/// Link task - one per transport.
///
/// Opens the transport, forwards frames, and always finishes with exactly one
/// `Closed` event. Closing is requested through `close_rx`; dropping the
/// sender counts as a request too.
async fn run_link(
    link: u64,
    connector: Arc<dyn Connector>,
    url: String,
    commands: mpsc::WeakUnboundedSender<Command>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        _ = &mut close_rx => {
            emit(&commands, link, LinkEvent::Closed);
            return;
        }
        result = connector.connect(&url) => result,
    };

    let mut transport = match connected {
        Ok(transport) => transport,
        Err(e) => {
            emit(&commands, link, LinkEvent::Failed(e.to_string()));
            emit(&commands, link, LinkEvent::Closed);
            return;
        }
    };

    emit(&commands, link, LinkEvent::Opened);

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                if let Err(e) = transport.close().await {
                    debug!(link, error = %e, "Error while closing transport");
                }
                break;
            }
            frame = transport.recv() => match frame {
                Ok(Some(frame)) => {
                    if !emit(&commands, link, LinkEvent::Frame(frame)) {
                        let _ = transport.close().await;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    emit(&commands, link, LinkEvent::Failed(e.to_string()));
                    let _ = transport.close().await;
                    break;
                }
            }
        }
    }

    emit(&commands, link, LinkEvent::Closed);
}
