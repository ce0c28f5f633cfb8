//! Shared test fixtures: in-memory transport, scripted auth API, JWT helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use nexusgate_live::auth::UserInfo;
use nexusgate_live::channel::{Connector, Transport};
use nexusgate_live::{AuthApi, AuthResponse, LiveError, Result};

// ---------------------------------------------------------------------------
// Scheduling helpers
// ---------------------------------------------------------------------------

/// Let spawned tasks run without advancing (paused) time.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time by `by`, then let woken tasks run.
pub async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
    settle().await;
}

// ---------------------------------------------------------------------------
// JWT helpers
// ---------------------------------------------------------------------------

/// HS256 token shaped like the ones the console issues.
pub fn jwt_expiring_in(secs: i64) -> String {
    jwt_with_exp(Utc::now().timestamp() + secs)
}

pub fn jwt_with_exp(exp: i64) -> String {
    let claims = json!({
        "user_id": 1,
        "username": "admin",
        "role": "admin",
        "exp": exp,
        "iat": Utc::now().timestamp(),
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"console-secret"))
        .expect("encode jwt")
}

pub fn jwt_without_exp() -> String {
    encode(
        &Header::default(),
        &json!({"user_id": 1, "role": "viewer"}),
        &EncodingKey::from_secret(b"console-secret"),
    )
    .expect("encode jwt")
}

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

enum Frame {
    Text(String),
    HangUp,
    Fail(String),
}

/// One recorded connection attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub url: String,
    pub at: Instant,
}

/// Test-side control of an accepted mock transport.
#[derive(Clone)]
pub struct MockSocket {
    frames: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.frames.send(Frame::Text(frame.into()));
    }

    pub fn push_event(&self, event_type: &str, data: serde_json::Value) {
        self.push(
            json!({"type": event_type, "data": data, "timestamp": "2026-01-01T00:00:00Z"})
                .to_string(),
        );
    }

    /// Peer closes the connection.
    pub fn hang_up(&self) {
        let _ = self.frames.send(Frame::HangUp);
    }

    /// Transport reports an error.
    pub fn fail(&self, reason: &str) {
        let _ = self.frames.send(Frame::Fail(reason.to_string()));
    }

    /// Whether the client closed or dropped this transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> Result<Option<String>> {
        match self.frames.recv().await {
            Some(Frame::Text(text)) => Ok(Some(text)),
            Some(Frame::HangUp) | None => Ok(None),
            Some(Frame::Fail(reason)) => Err(LiveError::Transport(reason)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ConnectorState {
    attempts: Vec<Attempt>,
    sockets: Vec<MockSocket>,
    refuse: bool,
}

/// In-memory connector recording every attempt.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) all further connection attempts.
    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().unwrap().refuse = refuse;
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    /// Sockets accepted so far, oldest first.
    pub fn sockets(&self) -> Vec<MockSocket> {
        self.state.lock().unwrap().sockets.clone()
    }

    pub fn last_socket(&self) -> MockSocket {
        self.sockets().pop().expect("no socket accepted yet")
    }

    /// Accepted sockets the client still holds open.
    pub fn open_sockets(&self) -> usize {
        self.sockets().iter().filter(|s| !s.is_closed()).count()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(Attempt {
            url: url.to_string(),
            at: Instant::now(),
        });

        if state.refuse {
            return Err(LiveError::Transport("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        state.sockets.push(MockSocket {
            frames: tx,
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(MockTransport { frames: rx, closed }))
    }
}

// ---------------------------------------------------------------------------
// Mock auth API
// ---------------------------------------------------------------------------

/// What the mock answers to the next refresh or login.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Issue a token valid for `ttl_secs`, optionally with a role
    Issue { ttl_secs: i64, role: Option<String> },
    /// Server error
    Fail,
    /// 401
    Reject,
}

#[derive(Debug, Clone)]
pub struct RefreshCall {
    pub token: String,
    pub at: Instant,
}

#[derive(Default)]
struct AuthState {
    outcomes: VecDeque<AuthOutcome>,
    refresh_calls: Vec<RefreshCall>,
    logins: Vec<String>,
    issued: Vec<String>,
}

/// Scripted [`AuthApi`]. Without a scripted outcome it issues 1000s tokens.
#[derive(Clone, Default)]
pub struct MockAuthApi {
    state: Arc<Mutex<AuthState>>,
}

impl MockAuthApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, outcome: AuthOutcome) {
        self.state.lock().unwrap().outcomes.push_back(outcome);
    }

    pub fn refresh_calls(&self) -> Vec<RefreshCall> {
        self.state.lock().unwrap().refresh_calls.clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.state.lock().unwrap().logins.clone()
    }

    /// Tokens handed out so far, oldest first.
    pub fn issued(&self) -> Vec<String> {
        self.state.lock().unwrap().issued.clone()
    }

    fn answer(&self) -> Result<AuthResponse> {
        let mut state = self.state.lock().unwrap();
        let outcome = state.outcomes.pop_front().unwrap_or(AuthOutcome::Issue {
            ttl_secs: 1000,
            role: None,
        });

        match outcome {
            AuthOutcome::Issue { ttl_secs, role } => {
                let token = jwt_expiring_in(ttl_secs);
                state.issued.push(token.clone());
                Ok(AuthResponse {
                    token,
                    user: role.map(|role| UserInfo {
                        id: Some(1),
                        username: Some("admin".into()),
                        role,
                    }),
                })
            }
            AuthOutcome::Fail => Err(LiveError::Auth("Refresh failed (500): boom".into())),
            AuthOutcome::Reject => Err(LiveError::Unauthorized("Refresh rejected: expired".into())),
        }
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        if password.is_empty() {
            return Err(LiveError::Unauthorized("Login rejected: invalid credentials".into()));
        }
        self.state.lock().unwrap().logins.push(username.to_string());
        self.answer()
    }

    async fn refresh(&self, token: &str) -> Result<AuthResponse> {
        self.state.lock().unwrap().refresh_calls.push(RefreshCall {
            token: token.to_string(),
            at: Instant::now(),
        });
        self.answer()
    }
}
