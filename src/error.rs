//! Error types for the signaling hub
//!
//! Defines application-level errors, signature and access errors, and
//! outbound queue send errors. Uses thiserror for ergonomic error definitions.

use serde::Serialize;
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::StatusCode;

/// Signature token errors
///
/// Raised before any client exists, so no resources need releasing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Room id, user id or timestamp is missing
    #[error("missing required fields")]
    MissingFields,

    /// Signature does not match the signed fields
    #[error("invalid signature")]
    InvalidSignature,
}

/// Authorization errors from the directory and administrative layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    /// User is on the room's block list
    #[error("You are blocked from this room")]
    Blocked,

    /// Action requires the host role
    #[error("Only the room host can do this")]
    NotHost,

    /// Moderation action aimed at the acting user
    #[error("Cannot target yourself")]
    SelfTarget,
}

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// handshake rejections (HTTP error response to the caller).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Signature token rejected
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Directory refused the user
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Upgrade query could not be parsed
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// No liveness signal within the read window
    #[error("Read deadline exceeded")]
    ReadTimeout,

    /// A frame could not be written within the write window
    #[error("Write deadline exceeded")]
    WriteTimeout,

    /// Malformed inbound payload
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Room loop terminated before handling the request
    #[error("Room closed: {0}")]
    RoomClosed(String),
}

impl AppError {
    /// HTTP status used when this error rejects an upgrade request
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidQuery(_) | AppError::Signature(SignatureError::MissingFields) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Signature(SignatureError::InvalidSignature)
            | AppError::Access(AccessError::UserNotFound(_)) => StatusCode::UNAUTHORIZED,
            AppError::Access(AccessError::Blocked)
            | AppError::Access(AccessError::NotHost)
            | AppError::Access(AccessError::SelfTarget) => StatusCode::FORBIDDEN,
            AppError::Access(AccessError::RoomNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Outbound queue send errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The client is not draining its queue fast enough
    #[error("Queue full")]
    QueueFull,
}

/// Error codes carried in a handshake rejection body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingFields,
    InvalidSignature,
    InvalidQuery,
    RoomNotFound,
    UserNotFound,
    Blocked,
    AccessDenied,
    Internal,
}

/// JSON body of a rejected upgrade request
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub code: ErrorCode,
    pub message: String,
}

/// Convert AppError to a Rejection for the handshake response
impl From<&AppError> for Rejection {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Signature(SignatureError::MissingFields) => ErrorCode::MissingFields,
            AppError::Signature(SignatureError::InvalidSignature) => ErrorCode::InvalidSignature,
            AppError::InvalidQuery(_) => ErrorCode::InvalidQuery,
            AppError::Access(AccessError::RoomNotFound(_)) => ErrorCode::RoomNotFound,
            AppError::Access(AccessError::UserNotFound(_)) => ErrorCode::UserNotFound,
            AppError::Access(AccessError::Blocked) => ErrorCode::Blocked,
            AppError::Access(_) => ErrorCode::AccessDenied,
            // Internal details stay in the server log
            _ => {
                return Rejection {
                    code: ErrorCode::Internal,
                    message: "Internal error".to_string(),
                }
            }
        };
        Rejection {
            code,
            message: err.to_string(),
        }
    }
}
