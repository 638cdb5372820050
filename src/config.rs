//! Signaling hub configuration.
//!
//! Configuration is loaded from environment variables. The shared
//! signing secret is redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Default listener address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

/// Default idle-room reap threshold (30 minutes).
pub const DEFAULT_ROOM_IDLE_TIMEOUT_SECONDS: u64 = 30 * 60;

/// Default interval between idle checks.
pub const DEFAULT_ROOM_IDLE_CHECK_SECONDS: u64 = 10;

/// Default capacity of a room's event queue.
pub const DEFAULT_ROOM_QUEUE_CAPACITY: usize = 100;

/// Default liveness window for inbound traffic.
pub const DEFAULT_PONG_WAIT_SECONDS: u64 = 60;

/// Default deadline for a single write.
pub const DEFAULT_WRITE_WAIT_SECONDS: u64 = 10;

/// Default quiet interval before an application pong is sent.
pub const DEFAULT_PONG_QUIET_SECONDS: u64 = 9;

/// Default maximum inbound message size.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 102_400;

/// Default capacity of a client's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Minimum secret length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Room loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    /// How long a room may stay empty before it is reaped.
    pub idle_timeout: Duration,
    /// Interval of the idle tick.
    pub idle_check_interval: Duration,
    /// Bound of the room's event queue.
    pub queue_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_ROOM_IDLE_TIMEOUT_SECONDS),
            idle_check_interval: Duration::from_secs(DEFAULT_ROOM_IDLE_CHECK_SECONDS),
            queue_capacity: DEFAULT_ROOM_QUEUE_CAPACITY,
        }
    }
}

/// Per-connection pump settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Read deadline, re-armed on every pong or payload.
    pub pong_wait: Duration,
    /// Deadline for each frame write.
    pub write_wait: Duration,
    /// Application pings inside this window after the last write get no pong.
    pub pong_quiet: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Bound of the client's outbound queue.
    pub outbound_capacity: usize,
}

impl ConnectionSettings {
    /// Transport ping period: 9/10 of the liveness window.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECONDS),
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECONDS),
            pong_quiet: Duration::from_secs(DEFAULT_PONG_QUIET_SECONDS),
            max_message_size: DEFAULT_MAX_MESSAGE_BYTES,
            outbound_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Signaling hub configuration.
#[derive(Clone)]
pub struct Config {
    /// Listener address (default: "127.0.0.1:8080").
    pub bind_address: String,

    /// Shared secret for signature tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub secret: SecretString,

    pub room: RoomSettings,

    pub connection: ConnectionSettings,
}

/// Custom Debug implementation that redacts the secret.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("secret", &"[REDACTED]")
            .field("room", &self.room)
            .field("connection", &self.connection)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let secret = vars
            .get("SIGNALING_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("SIGNALING_SECRET".to_string()))?;
        if secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "SIGNALING_SECRET must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        let secret = SecretString::from(secret.clone());

        let bind_address = vars
            .get("SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room = RoomSettings {
            idle_timeout: Duration::from_secs(parse_or(
                vars,
                "SIGNALING_ROOM_IDLE_TIMEOUT_SECONDS",
                DEFAULT_ROOM_IDLE_TIMEOUT_SECONDS,
            )?),
            idle_check_interval: Duration::from_secs(parse_or(
                vars,
                "SIGNALING_ROOM_IDLE_CHECK_SECONDS",
                DEFAULT_ROOM_IDLE_CHECK_SECONDS,
            )?),
            queue_capacity: parse_or(
                vars,
                "SIGNALING_ROOM_QUEUE_CAPACITY",
                DEFAULT_ROOM_QUEUE_CAPACITY,
            )?,
        };

        let connection = ConnectionSettings {
            pong_wait: Duration::from_secs(parse_or(
                vars,
                "SIGNALING_PONG_WAIT_SECONDS",
                DEFAULT_PONG_WAIT_SECONDS,
            )?),
            write_wait: Duration::from_secs(parse_or(
                vars,
                "SIGNALING_WRITE_WAIT_SECONDS",
                DEFAULT_WRITE_WAIT_SECONDS,
            )?),
            pong_quiet: Duration::from_secs(parse_or(
                vars,
                "SIGNALING_PONG_QUIET_SECONDS",
                DEFAULT_PONG_QUIET_SECONDS,
            )?),
            max_message_size: parse_or(
                vars,
                "SIGNALING_MAX_MESSAGE_BYTES",
                DEFAULT_MAX_MESSAGE_BYTES,
            )?,
            outbound_capacity: parse_or(
                vars,
                "SIGNALING_OUTBOUND_QUEUE_CAPACITY",
                DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            )?,
        };

        if room.idle_check_interval.is_zero() || connection.pong_wait.is_zero() {
            return Err(ConfigError::InvalidValue(
                "intervals must be greater than zero".to_string(),
            ));
        }
        if room.queue_capacity == 0 || connection.outbound_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "queue capacities must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            secret,
            room,
            connection,
        })
    }

    /// Raw secret bytes for the signature codec.
    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.expose_secret().as_bytes()
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
