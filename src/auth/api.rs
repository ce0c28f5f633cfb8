//! Console auth endpoints
//!
//! `POST {api_base}/auth/login` and `POST {api_base}/auth/refresh` both answer
//! with the same body:
//!
//! ```json
//! {"token": "<jwt>", "user": {"id": 1, "username": "admin", "role": "admin"}}
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{LiveError, Result};

/// User summary returned with a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    pub role: String,
}

/// Response from login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// Error body returned by the console API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// The two auth calls the client needs.
#[async_trait]
pub trait AuthApi: Send + Sync + 'static {
    /// Exchange username and password for a token.
    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse>;

    /// Exchange a still-valid token for a fresh one.
    async fn refresh(&self, token: &str) -> Result<AuthResponse>;
}

/// [`AuthApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    api_url: String,
    http: reqwest::Client,
}

impl HttpAuthApi {
    /// `api_url` is the console origin joined with the API base,
    /// e.g. `http://localhost:8080/api/v1`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn read_auth_response(what: &str, response: reqwest::Response) -> Result<AuthResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);

            return Err(if status == StatusCode::UNAUTHORIZED {
                LiveError::Unauthorized(format!("{} rejected: {}", what, detail))
            } else {
                LiveError::Auth(format!("{} failed ({}): {}", what, status, detail))
            });
        }

        response
            .json::<AuthResponse>()
            .await
            .map_err(|e| LiveError::Auth(format!("Failed to parse {} response: {}", what, e)))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let url = format!("{}/auth/login", self.api_url);
        debug!(url = %url, username, "Logging in");

        let body = serde_json::json!({
            "username": username,
            "password": password,
        });

        let response = self.http.post(&url).json(&body).send().await?;
        Self::read_auth_response("Login", response).await
    }

    async fn refresh(&self, token: &str) -> Result<AuthResponse> {
        let url = format!("{}/auth/refresh", self.api_url);
        debug!(url = %url, "Refreshing token");

        let response = self.http.post(&url).bearer_auth(token).send().await?;
        Self::read_auth_response("Refresh", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_with_user() {
        let json = r#"{"token":"abc","user":{"id":1,"username":"admin","role":"admin"}}"#;
        let resp: AuthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.token, "abc");
        let user = resp.user.unwrap();
        assert_eq!(user.role, "admin");
        assert_eq!(user.username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_auth_response_without_user() {
        let resp: AuthResponse = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert!(resp.user.is_none());
    }

    #[test]
    fn test_error_response() {
        let err: ErrorResponse = serde_json::from_str(r#"{"error":"invalid credentials"}"#).unwrap();
        assert_eq!(err.error, "invalid credentials");
    }

    #[test]
    fn test_api_url_trailing_slash() {
        let api = HttpAuthApi::new("http://localhost:8080/api/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.api_url(), "http://localhost:8080/api/v1");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        let api = HttpAuthApi::new("http://127.0.0.1:9/api/v1", Duration::from_secs(2)).unwrap();
        let result = api.refresh("token").await;
        assert!(matches!(result, Err(LiveError::Http(_))));
    }
}
