//! Handler registry
//!
//! Maps an event type to the callbacks interested in it. Callback identity is
//! the `Arc` allocation of the [`Handler`], so the same handler value can be
//! located again for removal. Registrations are tracked per lease, so one
//! consumer removing a handler never takes it away from another.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

use super::manager::LeaseToken;
use crate::message::Message;

/// A callback receiving the `data` field of matching events.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One handler and the leases that registered it.
struct Entry {
    handler: Handler,
    owners: Vec<LeaseToken>,
}

/// Event-type to callback index.
///
/// Each entry is jointly owned by the leases that registered it. The same
/// handler registered by two leases runs once per event and stays until
/// both have removed it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<Entry>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Handlers never run while the lock is held, so a poisoned lock only
    // means a panic elsewhere; the map itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handler` for `event_type` on behalf of `owner`. Returns `false`
    /// if `owner` had already registered it.
    pub fn register(&self, owner: LeaseToken, event_type: &str, handler: Handler) -> bool {
        let mut handlers = self.lock();
        let entries = handlers.entry(event_type.to_string()).or_default();
        match entries.iter_mut().find(|e| Arc::ptr_eq(&e.handler, &handler)) {
            Some(entry) if entry.owners.contains(&owner) => false,
            Some(entry) => {
                entry.owners.push(owner);
                true
            }
            None => {
                entries.push(Entry {
                    handler,
                    owners: vec![owner],
                });
                true
            }
        }
    }

    /// Drop `owner`'s claim on `handler` for `event_type`. The handler stops
    /// receiving events once no owner is left. Returns `false` if `owner`
    /// held no such claim.
    pub fn unregister(&self, owner: LeaseToken, event_type: &str, handler: &Handler) -> bool {
        let mut handlers = self.lock();
        let Some(entries) = handlers.get_mut(event_type) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(&e.handler, handler)) else {
            return false;
        };

        let entry = &mut entries[pos];
        let before = entry.owners.len();
        entry.owners.retain(|o| *o != owner);
        let removed = entry.owners.len() != before;

        if entry.owners.is_empty() {
            entries.remove(pos);
        }
        if entries.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    /// Invoke every handler registered for `message.event_type`, in
    /// registration order. Returns how many handlers ran to completion.
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    pub fn dispatch(&self, message: &Message) -> usize {
        // Snapshot so handlers may call on/off without deadlocking.
        let targets: Vec<Handler> = match self.lock().get(&message.event_type) {
            Some(entries) => entries.iter().map(|e| Arc::clone(&e.handler)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for target in targets {
            match catch_unwind(AssertUnwindSafe(|| target(&message.data))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(event_type = %message.event_type, "Event handler panicked");
                }
            }
        }
        delivered
    }

    /// Number of distinct handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.lock().get(event_type).map_or(0, Vec::len)
    }

    /// Total number of distinct handlers across all event types.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.lock();
        let mut types: Vec<(&String, usize)> =
            handlers.iter().map(|(k, v)| (k, v.len())).collect();
        types.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &types).finish()
    }
}
