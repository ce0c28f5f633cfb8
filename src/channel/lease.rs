//! Consumer leases
//!
//! A [`Lease`] is one consumer's claim on the shared transport. It remembers
//! every handler it registered, so releasing the lease removes exactly its
//! own registrations. A handler another lease also registered keeps running
//! for that lease.

use tracing::trace;

use super::manager::LeaseToken;
use super::registry::Handler;
use super::EventChannel;

/// One consumer's hold on the event channel.
///
/// The transport stays up while any lease is held. Dropping the lease
/// releases it; [`Lease::release`] does the same explicitly. Either way the
/// release happens once.
pub struct Lease {
    token: LeaseToken,
    channel: EventChannel,
    handlers: Vec<(String, Handler)>,
    released: bool,
}

impl Lease {
    pub(crate) fn new(channel: EventChannel) -> Self {
        let token = channel.register_lease();
        Self {
            token,
            channel,
            handlers: Vec::new(),
            released: false,
        }
    }

    pub fn token(&self) -> LeaseToken {
        self.token
    }

    /// The channel this lease belongs to.
    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    /// Subscribe `handler` to events of `event_type`.
    ///
    /// Registering the same handler for the same type again has no effect.
    pub fn on(&mut self, event_type: &str, handler: Handler) {
        if self.released {
            return;
        }

        if self
            .channel
            .registry()
            .register(self.token, event_type, handler.clone())
        {
            self.handlers.push((event_type.to_string(), handler));
        }
    }

    /// Unsubscribe `handler` from `event_type`. Absent handlers are ignored.
    pub fn off(&mut self, event_type: &str, handler: &Handler) {
        self.channel.registry().unregister(self.token, event_type, handler);
        self.handlers
            .retain(|(t, h)| !(t == event_type && std::sync::Arc::ptr_eq(h, handler)));
    }

    /// Handlers currently held by this lease.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Release the lease now instead of at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Unregister before the release reaches the connection task, so no
        // event dispatched after this point can reach these handlers.
        let registry = self.channel.registry();
        for (event_type, handler) in self.handlers.drain(..) {
            registry.unregister(self.token, &event_type, &handler);
        }

        trace!(lease = %self.token, "Releasing lease");
        self.channel.release_lease(self.token);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("token", &self.token)
            .field("handlers", &self.handlers.len())
            .field("released", &self.released)
            .finish()
    }
}
