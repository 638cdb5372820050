//! Client struct definition
//!
//! Represents one connected member: its identity, outbound queue,
//! activity clock and the room it is currently attached to.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::debug;

use crate::error::SendError;
use crate::message::{Message, Peer};
use crate::room::RoomHandle;
use crate::types::{Role, SessionId};

/// Connected client
///
/// Shared as `Arc<Client>` between the room's member map and the
/// connection pumps. The outbound queue is bounded; enqueueing never blocks.
pub struct Client {
    peer: Peer,
    session: SessionId,
    joined_at: DateTime<Utc>,
    /// Room -> client message queue; `None` once closed
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    last_activity: Mutex<Instant>,
    /// Back-reference to the current room; `None` when unattached
    room: Mutex<Option<RoomHandle>>,
}

impl Client {
    /// Create a new client writing into the given queue
    pub fn new(peer: Peer, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            peer,
            session: SessionId::new(),
            joined_at: Utc::now(),
            outbound: Mutex::new(Some(outbound)),
            last_activity: Mutex::new(Instant::now()),
            room: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.peer.id
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn role(&self) -> Role {
        self.peer.role
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Enqueue a message without waiting.
    ///
    /// A full queue drops the message and reports `QueueFull`.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        let Some(sender) = self.sender() else {
            return Err(SendError::ChannelClosed);
        };
        sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Enqueue a kick envelope.
    ///
    /// Kicks are never dropped: if the queue is full the kick waits for
    /// capacity on a detached task.
    pub fn kick(&self, notice: &str) {
        let Some(sender) = self.sender() else {
            return;
        };
        match sender.try_send(Message::kick(notice)) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                debug!(user_id = %self.peer.id, "Outbound queue full, deferring kick");
                tokio::spawn(async move {
                    let _ = sender.send(msg).await;
                });
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close the outbound queue so the writer sends a close frame and exits.
    pub fn close_queue(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Record outbound traffic
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last recorded traffic
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Current room, if attached
    pub fn room(&self) -> Option<RoomHandle> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn attach(&self, room: RoomHandle) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = Some(room);
    }

    /// Take the room back-reference; only the first caller gets it.
    pub(crate) fn detach(&self) -> Option<RoomHandle> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn sender(&self) -> Option<mpsc::Sender<Message>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.peer.id)
            .field("role", &self.peer.role)
            .field("session", &self.session)
            .finish()
    }
}
