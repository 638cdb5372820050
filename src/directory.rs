//! Room and user directory
//!
//! Boundary to whatever stores users, rooms, ownership and block lists.
//! The hub only asks three questions of it: may this user enter this room
//! (and as whom), which role does the user hold there, and block a user.
//!
//! Lookups run inside the upgrade handshake callback, so the trait is
//! synchronous.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use crate::error::AccessError;
use crate::types::Role;

/// Display profile of a user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    pub name: String,
    pub avatar: String,
}

/// Result of a successful admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub profile: Profile,
    pub role: Role,
}

/// Persistence collaborator consulted on every upgrade and moderation call
pub trait Directory: Send + Sync {
    /// Resolve `user_id` in `room_id`, refusing unknown or blocked users.
    fn admit(&self, room_id: &str, user_id: &str) -> Result<Membership, AccessError>;

    /// Role of `user_id` in `room_id` without admission side effects
    fn role_of(&self, room_id: &str, user_id: &str) -> Result<Role, AccessError>;

    /// Prevent `user_id` from entering `room_id` again
    fn block(&self, room_id: &str, user_id: &str) -> Result<(), AccessError>;
}

#[derive(Debug, Default)]
struct RoomRecord {
    owner: String,
    blocked: HashSet<String>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, Profile>,
    rooms: HashMap<String, RoomRecord>,
}

/// In-process directory
///
/// Strict mode only knows registered users and rooms. Open mode registers
/// unknown users under their id and creates unknown rooms on first use,
/// making the first user to enter a room its owner.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    tables: RwLock<Tables>,
    open: bool,
}

impl InMemoryDirectory {
    /// Directory that only admits registered users into registered rooms
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that creates users and rooms on demand
    pub fn open() -> Self {
        Self {
            tables: RwLock::default(),
            open: true,
        }
    }

    pub fn add_user(&self, user_id: &str, profile: Profile) {
        self.write().users.insert(user_id.to_string(), profile);
    }

    /// Register a room owned by `owner`; an existing room keeps its record.
    pub fn add_room(&self, room_id: &str, owner: &str) {
        self.write()
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomRecord {
                owner: owner.to_string(),
                blocked: HashSet::new(),
            });
    }

    pub fn is_blocked(&self, room_id: &str, user_id: &str) -> bool {
        self.read()
            .rooms
            .get(room_id)
            .is_some_and(|room| room.blocked.contains(user_id))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn role_in(room: &RoomRecord, user_id: &str) -> Role {
    if room.owner == user_id {
        Role::HOST
    } else {
        Role::PARTICIPANT
    }
}

impl Directory for InMemoryDirectory {
    fn admit(&self, room_id: &str, user_id: &str) -> Result<Membership, AccessError> {
        let mut tables = self.write();

        if !tables.users.contains_key(user_id) {
            if !self.open {
                return Err(AccessError::UserNotFound(user_id.to_string()));
            }
            debug!(user_id = %user_id, "Registering unknown user");
            tables.users.insert(
                user_id.to_string(),
                Profile {
                    name: user_id.to_string(),
                    avatar: String::new(),
                },
            );
        }

        if !tables.rooms.contains_key(room_id) {
            if !self.open {
                return Err(AccessError::RoomNotFound(room_id.to_string()));
            }
            info!(room_id = %room_id, owner = %user_id, "Creating room on first entry");
            tables.rooms.insert(
                room_id.to_string(),
                RoomRecord {
                    owner: user_id.to_string(),
                    blocked: HashSet::new(),
                },
            );
        }

        let Tables { users, rooms } = &*tables;
        let room = rooms
            .get(room_id)
            .ok_or_else(|| AccessError::RoomNotFound(room_id.to_string()))?;
        if room.blocked.contains(user_id) {
            return Err(AccessError::Blocked);
        }
        let profile = users
            .get(user_id)
            .cloned()
            .ok_or_else(|| AccessError::UserNotFound(user_id.to_string()))?;

        Ok(Membership {
            profile,
            role: role_in(room, user_id),
        })
    }

    fn role_of(&self, room_id: &str, user_id: &str) -> Result<Role, AccessError> {
        let tables = self.read();
        let room = tables
            .rooms
            .get(room_id)
            .ok_or_else(|| AccessError::RoomNotFound(room_id.to_string()))?;
        Ok(role_in(room, user_id))
    }

    fn block(&self, room_id: &str, user_id: &str) -> Result<(), AccessError> {
        let mut tables = self.write();
        let room = tables
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| AccessError::RoomNotFound(room_id.to_string()))?;
        room.blocked.insert(user_id.to_string());
        info!(room_id = %room_id, user_id = %user_id, "User blocked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.add_user(
            "u1",
            Profile {
                name: "Alice".to_string(),
                avatar: "a.png".to_string(),
            },
        );
        directory.add_user("u2", Profile::default());
        directory.add_room("r1", "u1");
        directory
    }

    #[test]
    fn test_owner_is_host() {
        let directory = strict();

        let owner = directory.admit("r1", "u1").unwrap();
        assert_eq!(owner.role, Role::HOST);
        assert_eq!(owner.profile.name, "Alice");

        let guest = directory.admit("r1", "u2").unwrap();
        assert_eq!(guest.role, Role::PARTICIPANT);
    }

    #[test]
    fn test_strict_rejects_unknown() {
        let directory = strict();
        assert_eq!(
            directory.admit("r1", "ghost"),
            Err(AccessError::UserNotFound("ghost".to_string()))
        );
        assert_eq!(
            directory.admit("r9", "u1"),
            Err(AccessError::RoomNotFound("r9".to_string()))
        );
    }

    #[test]
    fn test_blocked_user_refused() {
        let directory = strict();
        directory.block("r1", "u2").unwrap();

        assert_eq!(directory.admit("r1", "u2"), Err(AccessError::Blocked));
        assert!(directory.is_blocked("r1", "u2"));
        assert!(directory.admit("r1", "u1").is_ok());
        assert_eq!(
            directory.block("r9", "u2"),
            Err(AccessError::RoomNotFound("r9".to_string()))
        );
    }

    #[test]
    fn test_open_mode_first_entrant_owns_room() {
        let directory = InMemoryDirectory::open();

        let first = directory.admit("lobby", "alice").unwrap();
        assert_eq!(first.role, Role::HOST);
        assert_eq!(first.profile.name, "alice");

        let second = directory.admit("lobby", "bob").unwrap();
        assert_eq!(second.role, Role::PARTICIPANT);
        assert_eq!(directory.role_of("lobby", "alice"), Ok(Role::HOST));
    }

    #[test]
    fn test_add_room_keeps_existing_owner() {
        let directory = strict();
        directory.add_room("r1", "u2");
        assert_eq!(directory.role_of("r1", "u1"), Ok(Role::HOST));
    }
}
