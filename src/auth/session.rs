//! Auth session
//!
//! Owns the login state of one operator: the stored token and role, and the
//! refresher that keeps the token alive.
//!
//! With an [`EventChannel`] attached, every change to the stored token is
//! passed on to it: logging out or losing the token to a 401 closes the open
//! transport at once instead of leaving it streaming on a revoked credential,
//! and logging in connects a channel that was waiting for a token.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::api::{AuthApi, AuthResponse};
use super::refresher::{CredentialRefresher, RefreshPolicy};
use super::{clear_rejected_token, persist_auth_response};
use crate::channel::EventChannel;
use crate::credential::{Credential, TokenStore, ROLE_KEY, TOKEN_KEY};
use crate::error::Result;

pub struct AuthSession {
    store: Arc<dyn TokenStore>,
    api: Arc<dyn AuthApi>,
    refresher: CredentialRefresher,
    channel: Option<EventChannel>,
}

impl AuthSession {
    pub fn new(store: Arc<dyn TokenStore>, api: Arc<dyn AuthApi>, policy: RefreshPolicy) -> Self {
        let refresher = CredentialRefresher::new(Arc::clone(&store), Arc::clone(&api), policy);
        Self {
            store,
            api,
            refresher,
            channel: None,
        }
    }

    /// Keep `channel` in step with the stored token.
    pub fn with_channel(mut self, channel: EventChannel) -> Self {
        self.refresher.attach_channel(channel.clone());
        self.channel = Some(channel);
        self
    }

    fn notify_channel(&self) {
        if let Some(channel) = &self.channel {
            channel.credential_changed();
        }
    }

    pub fn refresher(&self) -> &CredentialRefresher {
        &self.refresher
    }

    /// Arm the refresher for a token left over from a previous run.
    pub fn start(&self) -> Option<Duration> {
        self.refresher.schedule_refresh()
    }

    /// Log in and keep the new token fresh.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let response = self.api.login(username, password).await?;
        persist_auth_response(self.store.as_ref(), &response)?;

        info!(
            username,
            role = response.user.as_ref().map(|u| u.role.as_str()).unwrap_or("unknown"),
            "Logged in"
        );
        self.refresher.schedule_refresh();
        self.notify_channel();
        Ok(response)
    }

    /// Stop refreshing and forget the token and role.
    pub fn logout(&self) -> Result<()> {
        self.refresher.cancel();
        let removed = self
            .store
            .remove(TOKEN_KEY)
            .and_then(|()| self.store.remove(ROLE_KEY));
        self.notify_channel();
        removed?;
        info!("Logged out");
        Ok(())
    }

    /// React to a 401 from any console call.
    ///
    /// The role is kept so the next login screen can still show it; the
    /// token is gone, so the event channel drops its transport and stops
    /// reconnecting until a new login stores one.
    pub fn handle_unauthorized(&self) -> Result<()> {
        warn!("Credential rejected by console");
        self.refresher.cancel();
        let cleared = clear_rejected_token(self.store.as_ref());
        self.notify_channel();
        cleared
    }

    /// Role from the last login or refresh.
    pub fn role(&self) -> Option<String> {
        self.store.get(ROLE_KEY)
    }

    pub fn credential(&self) -> Option<Credential> {
        Credential::load(self.store.as_ref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("credential", &self.credential())
            .field("refresher", &self.refresher)
            .field("channel_attached", &self.channel.is_some())
            .finish()
    }
}
