//! Bearer credential
//!
//! Only the `exp` claim is ever read here. Signature verification is the
//! server's job; the client just needs to know when to renew.

use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use super::store::{TokenStore, TOKEN_KEY};

#[derive(Debug, Deserialize)]
struct ExpiryClaim {
    #[serde(default)]
    exp: Option<i64>,
}

/// Read the `exp` claim (seconds since the Unix epoch) from a JWT.
///
/// Returns `None` if the token is not a JWT, has no `exp`, or `exp` is not
/// positive.
pub fn decode_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    data.claims.exp.filter(|exp| *exp > 0)
}

/// The current bearer token and its decoded expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    raw_token: String,
    expiry_epoch_seconds: Option<i64>,
}

impl Credential {
    /// Wrap a raw token, decoding its expiry if possible.
    pub fn from_token(raw_token: impl Into<String>) -> Self {
        let raw_token = raw_token.into();
        let expiry_epoch_seconds = decode_expiry(&raw_token);
        Self {
            raw_token,
            expiry_epoch_seconds,
        }
    }

    /// Load the credential currently held by `store`, if any.
    pub fn load(store: &dyn TokenStore) -> Option<Self> {
        store
            .get(TOKEN_KEY)
            .filter(|token| !token.is_empty())
            .map(Self::from_token)
    }

    pub fn raw_token(&self) -> &str {
        &self.raw_token
    }

    pub fn expiry_epoch_seconds(&self) -> Option<i64> {
        self.expiry_epoch_seconds
    }

    /// Seconds until expiry measured from now (negative once expired).
    pub fn remaining_secs(&self) -> Option<f64> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        self.expiry_epoch_seconds
            .map(|exp| exp as f64 - now_ms / 1000.0)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("raw_token", &"<redacted>")
            .field("expiry_epoch_seconds", &self.expiry_epoch_seconds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryTokenStore;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn jwt(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"console-secret")).unwrap()
    }

    #[test]
    fn test_decode_expiry() {
        let token = jwt(json!({"user_id": 1, "role": "admin", "exp": 1_900_000_000}));
        assert_eq!(decode_expiry(&token), Some(1_900_000_000));
    }

    #[test]
    fn test_expired_token_still_decodes() {
        let token = jwt(json!({"exp": 1_000}));
        assert_eq!(decode_expiry(&token), Some(1_000));
    }

    #[test]
    fn test_missing_or_zero_exp() {
        assert_eq!(decode_expiry(&jwt(json!({"sub": "admin"}))), None);
        assert_eq!(decode_expiry(&jwt(json!({"exp": 0}))), None);
    }

    #[test]
    fn test_not_a_jwt() {
        assert_eq!(decode_expiry("test-token"), None);
        assert_eq!(decode_expiry("a.b.c"), None);
        assert_eq!(decode_expiry(""), None);
    }

    #[test]
    fn test_load_from_store() {
        let store = MemoryTokenStore::new();
        assert!(Credential::load(&store).is_none());

        store.set(TOKEN_KEY, "").unwrap();
        assert!(Credential::load(&store).is_none());

        let exp = Utc::now().timestamp() + 100;
        store.set(TOKEN_KEY, &jwt(json!({"exp": exp}))).unwrap();
        let credential = Credential::load(&store).unwrap();
        assert_eq!(credential.expiry_epoch_seconds(), Some(exp));

        let remaining = credential.remaining_secs().unwrap();
        assert!(remaining > 98.0 && remaining <= 100.0, "remaining {}", remaining);
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::from_token("super-secret");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("super-secret"));
    }
}
