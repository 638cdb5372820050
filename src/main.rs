//! Signaling Hub - Entry Point
//!
//! `signaling_hub [bind-address]` starts the hub.
//! `signaling_hub sign <room> <user>` prints an upgrade query string.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signaling_hub::{issue_token, serve, AppState, Config, InMemoryDirectory};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=signaling_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("signaling_hub=info")),
        )
        .init();

    let mut config = Config::from_env()?;
    let args: Vec<String> = env::args().skip(1).collect();

    // Rooms and users are created on first entry
    let directory = Arc::new(InMemoryDirectory::open());

    if args.first().map(String::as_str) == Some("sign") {
        let (Some(room_id), Some(user_id)) = (args.get(1), args.get(2)) else {
            return Err("usage: signaling_hub sign <room> <user>".into());
        };
        let state = AppState::new(config, directory);
        let token = issue_token(&state.codec, state.directory.as_ref(), room_id, user_id)?;
        println!("{}", token.to_query()?);
        return Ok(());
    }

    // Bind address from command line overrides the environment
    if let Some(addr) = args.into_iter().next() {
        config.bind_address = addr;
    }

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!(config = ?config, "Configuration loaded");

    let state = Arc::new(AppState::new(config, directory));
    serve(listener, state).await?;

    Ok(())
}
