//! Administrative operations
//!
//! Moderation entry points for an outer HTTP layer. Every action is taken
//! on behalf of an acting user who must be the host of the room.

use std::sync::Arc;

use tracing::info;

use crate::directory::Directory;
use crate::error::{AccessError, AppError};
use crate::registry::RoomRegistry;
use crate::room::RoomInfo;

/// Notice carried by the kick envelope of a kicked member
pub const KICKED_NOTICE: &str = "You have been kicked from the room";

/// Notice carried by the kick envelope of a blocked member
pub const BLOCKED_NOTICE: &str = "You have been blocked from the room";

/// Outcome of a moderation action against one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moderation {
    /// Whether the target was connected and received a kick envelope
    pub was_online: bool,
}

/// Moderation and monitoring facade over the registry and directory
#[derive(Clone)]
pub struct AdminService {
    registry: RoomRegistry,
    directory: Arc<dyn Directory>,
}

impl AdminService {
    pub fn new(registry: RoomRegistry, directory: Arc<dyn Directory>) -> Self {
        Self {
            registry,
            directory,
        }
    }

    /// Disconnect `target_id` from `room_id` if it is online.
    pub async fn kick_member(
        &self,
        room_id: &str,
        actor_id: &str,
        target_id: &str,
    ) -> Result<Moderation, AppError> {
        self.require_host(room_id, actor_id)?;
        if actor_id == target_id {
            return Err(AccessError::SelfTarget.into());
        }

        let was_online = self.registry.kick_member(room_id, target_id, KICKED_NOTICE).await;
        info!(
            room_id = %room_id,
            actor = %actor_id,
            target = %target_id,
            was_online,
            "Member kicked"
        );
        Ok(Moderation { was_online })
    }

    /// Block `target_id` from `room_id` and disconnect it if online.
    pub async fn block_member(
        &self,
        room_id: &str,
        actor_id: &str,
        target_id: &str,
    ) -> Result<Moderation, AppError> {
        self.require_host(room_id, actor_id)?;
        if actor_id == target_id {
            return Err(AccessError::SelfTarget.into());
        }

        self.directory.block(room_id, target_id)?;
        let was_online = self.registry.kick_member(room_id, target_id, BLOCKED_NOTICE).await;
        info!(
            room_id = %room_id,
            actor = %actor_id,
            target = %target_id,
            was_online,
            "Member blocked"
        );
        Ok(Moderation { was_online })
    }

    /// Evict every member of `room_id` and stop the room.
    ///
    /// Returns whether the room was live.
    pub async fn close_room(&self, room_id: &str, actor_id: &str) -> Result<bool, AppError> {
        self.require_host(room_id, actor_id)?;

        let closed = self.registry.close_room(room_id).await;
        info!(room_id = %room_id, actor = %actor_id, closed, "Room closed by host");
        Ok(closed)
    }

    /// One entry per live room, oldest first
    pub async fn monitoring(&self) -> Vec<RoomInfo> {
        self.registry.snapshot().await
    }

    fn require_host(&self, room_id: &str, actor_id: &str) -> Result<(), AppError> {
        if self.directory.role_of(room_id, actor_id)?.is_host() {
            Ok(())
        } else {
            Err(AccessError::NotHost.into())
        }
    }
}

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService")
            .field("registry", &self.registry)
            .finish()
    }
}
