//! Message protocol definitions
//!
//! Every frame carries one or more JSON envelopes
//! `{type, from, to, data}` separated by a single newline. The envelope
//! payload (`data`) is opaque and forwarded verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::types::Role;

/// Envelope type
///
/// Unknown wire values decode to `Other` so the router can log and
/// ignore them instead of tearing the connection down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Ping,
    Pong,
    Join,
    Leave,
    RosterRequest,
    RosterResponse,
    SignalingEvent,
    Chat,
    Kick,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::RosterRequest => "roster-request",
            MessageType::RosterResponse => "roster-response",
            MessageType::SignalingEvent => "signaling-event",
            MessageType::Chat => "chat",
            MessageType::Kick => "kick",
            MessageType::Other(other) => other,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "join" => MessageType::Join,
            "leave" => MessageType::Leave,
            "roster-request" => MessageType::RosterRequest,
            "roster-response" => MessageType::RosterResponse,
            "signaling-event" => MessageType::SignalingEvent,
            "chat" => MessageType::Chat,
            "kick" => MessageType::Kick,
            _ => MessageType::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sender identity as it appears in `from`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Peer {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub role: Role,
}

/// Addressee as it appears in `to`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub id: String,
}

/// In-process fan-out selector; never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Receiver {
    #[default]
    Everyone,
    /// Members holding any role in the mask
    Roles(Role),
    /// Exactly one member
    Member(String),
}

impl Receiver {
    /// Whether a member with this identity may receive the message
    pub fn accepts(&self, member: &Peer) -> bool {
        match self {
            Receiver::Everyone => true,
            Receiver::Roles(mask) => member.role.intersects(*mask),
            Receiver::Member(id) => member.id == *id,
        }
    }
}

/// One signaling envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub from: Option<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Target>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip)]
    pub receiver: Receiver,
}

impl Message {
    pub fn new(kind: MessageType, from: Option<Peer>, data: Value) -> Self {
        Self {
            kind,
            from,
            to: None,
            data,
            receiver: Receiver::Everyone,
        }
    }

    /// Join/leave notification originating from `peer`
    pub fn presence(kind: MessageType, peer: &Peer) -> Self {
        Self::new(kind, Some(peer.clone()), Value::Null)
    }

    /// Server-originated kick carrying a human-readable notice
    pub fn kick(notice: &str) -> Self {
        let data = if notice.is_empty() {
            Value::Null
        } else {
            Value::String(notice.to_string())
        };
        Self::new(MessageType::Kick, None, data)
    }

    /// Set the fan-out selector
    pub fn with_receiver(mut self, receiver: Receiver) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.from.as_ref().map(|p| p.id.as_str())
    }

    pub fn target_id(&self) -> Option<&str> {
        self.to
            .as_ref()
            .map(|t| t.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Split a text frame into its envelope lines.
///
/// Trailing whitespace and control characters are trimmed first; blank
/// lines are skipped.
pub fn split_frame(text: &str) -> impl Iterator<Item = &str> {
    text.trim_end_matches(|c: char| c.is_control() || c.is_whitespace())
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
}

/// Decode one envelope line
pub fn decode(line: &str) -> Result<Message, AppError> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a batch of envelopes into one newline-separated frame.
pub fn encode_batch(messages: &[Message]) -> Result<String, AppError> {
    let mut frame = String::new();
    for (index, message) in messages.iter().enumerate() {
        if index > 0 {
            frame.push('\n');
        }
        frame.push_str(&serde_json::to_string(message)?);
    }
    Ok(frame)
}
