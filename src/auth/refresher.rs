//! Proactive token refresh
//!
//! Renews the bearer token before it expires. With the default policy the
//! refresh runs once 80% of the remaining lifetime has passed, but never
//! sooner than 60 seconds out:
//!
//! ```text
//! delay = max(remaining * lead_fraction, min_delay)
//! ```
//!
//! A successful refresh stores the new token (and role) and re-arms the timer
//! from the new expiry. A failed refresh leaves the timer disarmed. A 401
//! additionally drops the stored token, the same as any other rejected call,
//! and tells an attached [`EventChannel`] to close its transport.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::api::AuthApi;
use super::{clear_rejected_token, persist_auth_response};
use crate::channel::EventChannel;
use crate::credential::{Credential, TokenStore};
use crate::error::LiveError;
use crate::timer::ScheduledTask;

/// Default share of the remaining lifetime to wait before refreshing.
pub const DEFAULT_LEAD_FRACTION: f64 = 0.8;

/// Default lower bound on the refresh delay.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(60);

// Far beyond any realistic token lifetime; keeps timer deadlines representable.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// When to refresh relative to expiry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    pub lead_fraction: f64,
    pub min_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead_fraction: DEFAULT_LEAD_FRACTION,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}

impl RefreshPolicy {
    /// Delay before refreshing a token with `remaining_secs` left.
    ///
    /// Already-expired tokens get `min_delay`.
    pub fn delay_for(&self, remaining_secs: f64) -> Duration {
        let secs = (remaining_secs * self.lead_fraction).max(self.min_delay.as_secs_f64());
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    task: Option<ScheduledTask>,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    api: Arc<dyn AuthApi>,
    policy: RefreshPolicy,
    slot: Mutex<Slot>,
    channel: Mutex<Option<EventChannel>>,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_channel(&self) {
        let channel = self.channel.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channel.as_ref() {
            channel.credential_changed();
        }
    }
}

/// Keeps the stored token fresh.
///
/// Cheap to clone; clones share the same timer.
#[derive(Clone)]
pub struct CredentialRefresher {
    inner: Arc<Inner>,
}

impl CredentialRefresher {
    pub fn new(store: Arc<dyn TokenStore>, api: Arc<dyn AuthApi>, policy: RefreshPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                policy,
                slot: Mutex::new(Slot::default()),
                channel: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    /// Channel to notify when a refresh is rejected and the token dropped.
    pub fn attach_channel(&self, channel: EventChannel) {
        *self.inner.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    /// Arm the refresh timer from the stored token's expiry.
    ///
    /// Any pending timer is replaced. Returns the chosen delay, or `None` if
    /// there is no token or its expiry cannot be read (nothing is armed).
    pub fn schedule_refresh(&self) -> Option<Duration> {
        let mut slot = self.inner.slot();
        slot.generation += 1;
        if let Some(mut previous) = slot.task.take() {
            previous.cancel();
        }

        let Some(credential) = Credential::load(self.inner.store.as_ref()) else {
            debug!("No token stored, refresh not scheduled");
            return None;
        };
        let Some(remaining) = credential.remaining_secs() else {
            debug!("Token has no readable expiry, refresh not scheduled");
            return None;
        };

        let delay = self.inner.policy.delay_for(remaining);
        let generation = slot.generation;
        let weak = Arc::downgrade(&self.inner);
        slot.task = Some(ScheduledTask::after(delay, fire(weak, generation)));

        debug!(
            delay_ms = delay.as_millis() as u64,
            remaining_secs = remaining as i64,
            "Token refresh scheduled"
        );
        Some(delay)
    }

    /// Disarm the timer. Also discards the result of a refresh that is
    /// already in flight. Idempotent.
    pub fn cancel(&self) {
        let mut slot = self.inner.slot();
        slot.generation += 1;
        if let Some(mut task) = slot.task.take() {
            task.cancel();
            debug!("Token refresh cancelled");
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.slot().task.as_ref().is_some_and(ScheduledTask::is_pending)
    }

    /// Time left until the armed refresh fires.
    pub fn pending_delay(&self) -> Option<Duration> {
        self.inner
            .slot()
            .task
            .as_ref()
            .filter(|task| task.is_pending())
            .map(ScheduledTask::remaining)
    }
}

impl std::fmt::Debug for CredentialRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRefresher")
            .field("policy", &self.inner.policy)
            .field("pending_delay", &self.pending_delay())
            .finish()
    }
}

/// Timer body: refresh, store, re-arm.
async fn fire(weak: Weak<Inner>, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    {
        let mut slot = inner.slot();
        if slot.generation != generation {
            return;
        }
        // This task is the one in the slot; release it without aborting
        // ourselves so the re-arm below can take the slot.
        if let Some(task) = slot.task.take() {
            task.detach();
        }
    }

    let Some(credential) = Credential::load(inner.store.as_ref()) else {
        debug!("Token disappeared before refresh");
        return;
    };

    let result = inner.api.refresh(credential.raw_token()).await;

    let slot = inner.slot();
    if slot.generation != generation {
        debug!("Token refresh superseded, discarding result");
        return;
    }

    match result {
        Ok(response) => {
            if let Err(e) = persist_auth_response(inner.store.as_ref(), &response) {
                warn!(error = %e, "Failed to store refreshed token");
                return;
            }
            drop(slot);
            info!("Token refreshed");
            CredentialRefresher { inner }.schedule_refresh();
        }
        Err(LiveError::Unauthorized(reason)) => {
            drop(slot);
            warn!(reason = %reason, "Token refresh rejected, clearing token");
            if let Err(e) = clear_rejected_token(inner.store.as_ref()) {
                warn!(error = %e, "Failed to clear rejected token");
            }
            inner.notify_channel();
        }
        Err(e) => {
            warn!(error = %e, "Token refresh failed");
        }
    }
}
