//! Message routing
//!
//! Decides what happens to each inbound envelope (`route`) and carries the
//! decision out (`dispatch`). Runs on the sending client's inbound task.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::AppError;
use crate::message::{Message, MessageType};
use crate::room::RoomHandle;

/// Routing decision for one inbound message
#[derive(Debug)]
pub enum Route {
    /// Send back to the originating client
    Reply(Message),
    /// Send to one other member, bypassing the room loop
    Direct { target: Arc<Client>, message: Message },
    /// Hand to the room loop for fan-out
    Broadcast(Message),
    /// Drop
    Ignore,
}

/// Decide how to handle `message` sent by `client` inside `room`.
///
/// `pong_quiet` suppresses application pongs while the connection has
/// seen outbound traffic recently.
pub async fn route(
    client: &Client,
    room: &RoomHandle,
    message: Message,
    pong_quiet: Duration,
) -> Route {
    match message.kind {
        MessageType::Ping => {
            if client.idle_for() < pong_quiet {
                return Route::Ignore;
            }
            Route::Reply(Message::new(
                MessageType::Pong,
                Some(client.peer().clone()),
                Value::Null,
            ))
        }
        MessageType::RosterRequest => {
            let roster = room.roster_excluding(client.id()).await;
            match serde_json::to_value(roster) {
                Ok(data) => Route::Reply(Message::new(
                    MessageType::RosterResponse,
                    Some(client.peer().clone()),
                    data,
                )),
                Err(e) => {
                    warn!(user_id = %client.id(), error = %e, "Failed to encode roster");
                    Route::Ignore
                }
            }
        }
        MessageType::SignalingEvent => {
            let Some(target_id) = message.target_id() else {
                warn!(user_id = %client.id(), "Signaling event without target");
                return Route::Ignore;
            };
            match room.find_member(target_id).await {
                Some(target) => Route::Direct { target, message },
                None => {
                    warn!(
                        room_id = %room.id(),
                        user_id = %client.id(),
                        target_id = %target_id,
                        "Signaling target not found"
                    );
                    Route::Ignore
                }
            }
        }
        MessageType::Chat => Route::Broadcast(message),
        MessageType::Other(ref kind) => {
            warn!(user_id = %client.id(), kind = %kind, "Unknown message type");
            Route::Ignore
        }
        // Server-originated types are never accepted from clients
        MessageType::Pong
        | MessageType::Join
        | MessageType::Leave
        | MessageType::RosterResponse
        | MessageType::Kick => {
            debug!(
                user_id = %client.id(),
                kind = %message.kind,
                "Ignoring server-only message type"
            );
            Route::Ignore
        }
    }
}

/// Stamp, route and deliver one inbound message.
pub async fn dispatch(
    client: &Client,
    mut message: Message,
    pong_quiet: Duration,
) -> Result<(), AppError> {
    let Some(room) = client.room() else {
        debug!(user_id = %client.id(), "Dropping message from detached client");
        return Ok(());
    };

    // Never trust the sender identity on the wire
    message.from = Some(client.peer().clone());

    match route(client, &room, message, pong_quiet).await {
        Route::Reply(reply) => {
            if let Err(e) = client.send(reply) {
                debug!(user_id = %client.id(), error = %e, "Reply dropped");
            }
        }
        Route::Direct { target, message } => {
            debug!(
                room_id = %room.id(),
                from = %client.id(),
                to = %target.id(),
                "Forwarding signaling event"
            );
            if let Err(e) = target.send(message) {
                warn!(user_id = %target.id(), error = %e, "Signaling event dropped");
            }
        }
        Route::Broadcast(message) => room.broadcast(message).await?,
        Route::Ignore => {}
    }
    Ok(())
}
