//! Console authentication
//!
//! | Module      | Responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | `api`       | Login and refresh calls against the console REST API  |
//! | `refresher` | Timer that renews the token before it expires         |
//! | `session`   | Login, logout and the 401 path                        |

mod api;
mod refresher;
mod session;

pub use api::{AuthApi, AuthResponse, HttpAuthApi, UserInfo};
pub use refresher::{CredentialRefresher, RefreshPolicy, DEFAULT_LEAD_FRACTION, DEFAULT_MIN_DELAY};
pub use session::AuthSession;

use crate::credential::{TokenStore, ROLE_KEY, TOKEN_KEY};
use crate::error::Result;

/// Store the token and, when the response carries one, the role.
pub(crate) fn persist_auth_response(store: &dyn TokenStore, response: &AuthResponse) -> Result<()> {
    store.set(TOKEN_KEY, &response.token)?;
    if let Some(user) = &response.user {
        store.set(ROLE_KEY, &user.role)?;
    }
    Ok(())
}

/// Forget a token the server no longer accepts.
pub(crate) fn clear_rejected_token(store: &dyn TokenStore) -> Result<()> {
    store.remove(TOKEN_KEY)
}
