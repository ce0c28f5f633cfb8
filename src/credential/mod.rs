//! Bearer credential storage and decoding
//!
//! | Module  | Responsibility                                        |
//! |---------|-------------------------------------------------------|
//! | `store` | Durable key/value storage for the token and role      |
//! | `token` | The `Credential` type and JWT expiry decoding         |
//!
//! The store is shared by the event channel (reads the token before every
//! connection attempt) and the auth flow (writes it on login and refresh).
//! Readers must tolerate the token being absent or stale at any read.

mod store;
mod token;

pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, ROLE_KEY, TOKEN_KEY};
pub use token::{decode_expiry, Credential};
