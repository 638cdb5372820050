//! Basic type definitions for the signaling hub
//!
//! Provides small value types shared by every module:
//! - `SessionId`: UUID identifying one connection of a user
//! - `Role`: bit-flag set of room roles

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one connection session (newtype pattern)
///
/// Two connections of the same user share a user id but never a session id,
/// which lets a room tell a stale session apart from its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room role as a bit-flag set
///
/// Serialized as its raw integer so it can be signed and sent on the wire.
/// Today a member holds exactly one of `HOST` or `PARTICIPANT`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(u8);

impl Role {
    /// No role bits set
    pub const NONE: Role = Role(0);
    /// Room owner: may moderate the room
    pub const HOST: Role = Role(1);
    /// Regular member
    pub const PARTICIPANT: Role = Role(1 << 1);
    /// Mask matching every role
    pub const ALL: Role = Role(u8::MAX);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if any bit of `mask` is set in this role
    pub const fn intersects(self, mask: Role) -> bool {
        self.0 & mask.0 != 0
    }

    /// True if every bit of `other` is set in this role
    pub const fn contains(self, other: Role) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_host(self) -> bool {
        self.intersects(Role::HOST)
    }
}

impl BitOr for Role {
    type Output = Role;

    fn bitor(self, rhs: Role) -> Role {
        Role(self.0 | rhs.0)
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.intersects(Role::HOST) {
            names.push("HOST");
        }
        if self.intersects(Role::PARTICIPANT) {
            names.push("PARTICIPANT");
        }
        write!(f, "Role({:#04x} {})", self.0, names.join("|"))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_role_bits() {
        assert_eq!(Role::HOST.bits(), 1);
        assert_eq!(Role::PARTICIPANT.bits(), 2);
        assert!(Role::HOST.is_host());
        assert!(!Role::PARTICIPANT.is_host());
    }

    #[test]
    fn test_role_composition() {
        let both = Role::HOST | Role::PARTICIPANT;
        assert!(both.contains(Role::HOST));
        assert!(both.contains(Role::PARTICIPANT));
        assert!(!Role::HOST.contains(both));
        assert!(Role::ALL.contains(both));
        assert!(!Role::NONE.intersects(Role::ALL));
    }

    #[test]
    fn test_role_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Role::PARTICIPANT).unwrap(), "2");
        let role: Role = serde_json::from_str("1").unwrap();
        assert_eq!(role, Role::HOST);
    }
}
