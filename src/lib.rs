//! Room-based WebRTC Signaling Hub Library
//!
//! A WebSocket signaling server built with tokio-tungstenite. Peers in the
//! same room exchange session descriptions and connectivity candidates
//! through it; media never passes through the hub.
//!
//! # Features
//! - Signed upgrade tokens (HMAC-SHA256)
//! - Presence events (join/leave) and roster requests
//! - Point-to-point signaling events and room-wide chat
//! - Same-user reconnect displaces the previous session
//! - Host moderation: kick, block, close room
//! - Idle rooms are reaped automatically
//! - Monitoring snapshot of every live room
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - Each `Room` runs one event loop that owns all membership changes
//! - `RoomRegistry` maps room ids to running rooms
//! - Each connection has a read task and a write task around its `Client`
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use signaling_hub::{serve, AppState, Config, InMemoryDirectory};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().unwrap();
//!     let listener = TcpListener::bind(&config.bind_address).await.unwrap();
//!     let state = Arc::new(AppState::new(config, Arc::new(InMemoryDirectory::open())));
//!
//!     serve(listener, state).await.unwrap();
//! }
//! ```

pub mod admin;
pub mod auth;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod router;
pub mod server;
pub mod signature;
pub mod types;

// Re-export main types for convenience
pub use admin::{AdminService, Moderation};
pub use auth::{authorize, issue_token, Admission};
pub use client::Client;
pub use config::{Config, ConfigError, ConnectionSettings, RoomSettings};
pub use directory::{Directory, InMemoryDirectory, Membership, Profile};
pub use error::{AccessError, AppError, SendError, SignatureError};
pub use handler::handle_connection;
pub use message::{Message, MessageType, Peer, Receiver, Target};
pub use registry::RoomRegistry;
pub use room::{RoomHandle, RoomInfo};
pub use server::{serve, AppState};
pub use signature::{SignatureCodec, SignatureRequest, SignatureToken};
pub use types::{Role, SessionId};
