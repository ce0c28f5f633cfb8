//! nexusgate-tail - print NexusGate console events as JSON lines

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info, warn};

use nexusgate_live::{
    handler, logging, Args, AuthApi, AuthSession, ConnectionState, EventChannel, FileTokenStore,
    Handler, HttpAuthApi, TokenStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let token_file = args.token_file();
    let event_types = args.event_types();
    let channel_config = args.channel_config()?;

    info!("Console: {}", args.console_url);
    info!("Events endpoint: {}", channel_config.endpoint());
    info!("Token file: {}", token_file.display());
    info!("Event types: {}", event_types.join(", "));

    let store: Arc<dyn TokenStore> = Arc::new(
        FileTokenStore::open(&token_file)
            .with_context(|| format!("Failed to open token file {}", token_file.display()))?,
    );
    let api: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(args.api_url(), args.request_timeout())?);
    let channel = EventChannel::websocket(channel_config, Arc::clone(&store));
    let session = AuthSession::new(Arc::clone(&store), api, args.refresh_policy())
        .with_channel(channel.clone());

    if session.is_authenticated() {
        match session.start() {
            Some(delay) => info!("Token refresh in {}s", delay.as_secs()),
            None => warn!("Stored token has no readable expiry, it will not be refreshed"),
        }
    } else if let Some((username, password)) = args.login_credentials() {
        session.login(username, password).await.context("Login failed")?;
    } else {
        warn!(
            "No token stored and no credentials supplied; waiting for a token in {}",
            token_file.display()
        );
    }

    let mut lease = channel.acquire();
    for event_type in &event_types {
        lease.on(event_type, print_event(event_type.clone()));
    }

    let mut status = channel.watch_status();
    let watcher = tokio::spawn(async move {
        let mut last = status.borrow().state;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if current.state == last {
                continue;
            }
            last = current.state;
            match current.state {
                ConnectionState::GaveUp => warn!(
                    attempts = current.reconnect_attempts,
                    "Gave up reconnecting, restart to try again"
                ),
                state => info!(state = %state, "Connection state changed"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    lease.release();
    session.refresher().cancel();
    watcher.abort();

    Ok(())
}

/// Handler writing `{"type": ..., "data": ...}` to stdout.
fn print_event(event_type: String) -> Handler {
    handler(move |data| {
        let line = serde_json::json!({ "type": event_type, "data": data });
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", line);
    })
}
