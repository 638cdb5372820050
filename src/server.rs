//! Server wiring
//!
//! `AppState` owns the process-wide collaborators (configuration, signature
//! codec, directory, room registry) and is injected into every connection.
//! `serve` runs the TCP accept loop.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::admin::AdminService;
use crate::config::Config;
use crate::directory::Directory;
use crate::error::AppError;
use crate::handler::handle_connection;
use crate::registry::RoomRegistry;
use crate::signature::SignatureCodec;

/// Shared state of a running hub
pub struct AppState {
    pub config: Config,
    pub codec: SignatureCodec,
    pub directory: Arc<dyn Directory>,
    pub registry: RoomRegistry,
}

impl AppState {
    pub fn new(config: Config, directory: Arc<dyn Directory>) -> Self {
        let codec = SignatureCodec::new(config.secret_bytes());
        let registry = RoomRegistry::new(config.room.clone());
        Self {
            config,
            codec,
            directory,
            registry,
        }
    }

    /// Moderation facade sharing this hub's registry and directory
    pub fn admin(&self) -> AdminService {
        AdminService::new(self.registry.clone(), Arc::clone(&self.directory))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Accept connections forever, one task per connection.
///
/// Only a failure of the listener itself is returned.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), AppError> {
    info!(addr = %listener.local_addr()?, "Signaling hub listening");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "Accepted connection");
                let state = Arc::clone(&state);

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        debug!(peer = %addr, error = %e, "Connection ended with error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
