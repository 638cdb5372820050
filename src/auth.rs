//! Upgrade authorization and token issuance
//!
//! A connection is admitted only with a valid signature token whose room
//! and user the directory accepts. The effective role always comes from
//! the directory, so a token signed for a stale role still cannot grant
//! more than the user holds today.

use chrono::Utc;
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::error::AppError;
use crate::message::Peer;
use crate::signature::{SignatureCodec, SignatureRequest, SignatureToken};

/// Identity of an authorized connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub room_id: String,
    pub peer: Peer,
}

/// Parse the upgrade query string into a token.
///
/// Missing fields decode to empty values and are caught by validation.
pub fn parse_query(query: Option<&str>) -> Result<SignatureToken, AppError> {
    serde_urlencoded::from_str(query.unwrap_or_default())
        .map_err(|e| AppError::InvalidQuery(e.to_string()))
}

/// Check a token and resolve the caller through the directory.
pub fn authorize(
    codec: &SignatureCodec,
    directory: &dyn Directory,
    token: &SignatureToken,
) -> Result<Admission, AppError> {
    codec.validate(token)?;

    let membership = directory.admit(&token.room_id, &token.user_id)?;
    if membership.role != token.role {
        debug!(
            room_id = %token.room_id,
            user_id = %token.user_id,
            signed = %token.role,
            current = %membership.role,
            "Token role differs from directory role"
        );
    }

    Ok(Admission {
        room_id: token.room_id.clone(),
        peer: Peer {
            id: token.user_id.clone(),
            name: membership.profile.name,
            avatar: membership.profile.avatar,
            role: membership.role,
        },
    })
}

/// Issue a fresh token for `user_id` in `room_id`.
///
/// Fails when the directory refuses the user, e.g. because it is blocked.
pub fn issue_token(
    codec: &SignatureCodec,
    directory: &dyn Directory,
    room_id: &str,
    user_id: &str,
) -> Result<SignatureToken, AppError> {
    let membership = directory.admit(room_id, user_id).inspect_err(|e| {
        warn!(room_id = %room_id, user_id = %user_id, error = %e, "Token refused");
    })?;

    let token = codec.generate(SignatureRequest {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        role: membership.role,
        timestamp: Utc::now().timestamp_millis(),
    })?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, Profile};
    use crate::error::{AccessError, SignatureError};
    use crate::types::Role;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn setup() -> (SignatureCodec, InMemoryDirectory) {
        let directory = InMemoryDirectory::new();
        directory.add_user(
            "u1",
            Profile {
                name: "Alice".to_string(),
                avatar: String::new(),
            },
        );
        directory.add_user("u2", Profile::default());
        directory.add_room("r1", "u1");
        (SignatureCodec::new(SECRET), directory)
    }

    #[test]
    fn test_issue_then_authorize() {
        let (codec, directory) = setup();

        let token = issue_token(&codec, &directory, "r1", "u1").unwrap();
        assert_eq!(token.role, Role::HOST);
        assert!(token.timestamp > 0);

        let query = token.to_query().unwrap();
        let parsed = parse_query(Some(&query)).unwrap();
        let admission = authorize(&codec, &directory, &parsed).unwrap();

        assert_eq!(admission.room_id, "r1");
        assert_eq!(admission.peer.id, "u1");
        assert_eq!(admission.peer.name, "Alice");
        assert_eq!(admission.peer.role, Role::HOST);
    }

    #[test]
    fn test_missing_query_is_missing_fields() {
        let (codec, directory) = setup();
        let token = parse_query(None).unwrap();
        let err = authorize(&codec, &directory, &token).unwrap_err();
        assert!(matches!(err, AppError::Signature(SignatureError::MissingFields)));
    }

    #[test]
    fn test_malformed_query_rejected() {
        assert!(matches!(
            parse_query(Some("roomId=r1&timestamp=soon")),
            Err(AppError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_forged_role_rejected() {
        let (codec, directory) = setup();
        let mut token = issue_token(&codec, &directory, "r1", "u2").unwrap();
        token.role = Role::HOST;

        let err = authorize(&codec, &directory, &token).unwrap_err();
        assert!(matches!(err, AppError::Signature(SignatureError::InvalidSignature)));
    }

    #[test]
    fn test_role_comes_from_directory() {
        let (codec, directory) = setup();
        // Validly signed, but claims a role the user does not hold
        let token = codec
            .generate(SignatureRequest {
                room_id: "r1".to_string(),
                user_id: "u2".to_string(),
                role: Role::HOST,
                timestamp: 1,
            })
            .unwrap();

        let admission = authorize(&codec, &directory, &token).unwrap();
        assert_eq!(admission.peer.role, Role::PARTICIPANT);
    }

    #[test]
    fn test_blocked_user_gets_no_token() {
        let (codec, directory) = setup();
        let token = issue_token(&codec, &directory, "r1", "u2").unwrap();
        directory.block("r1", "u2").unwrap();

        assert!(matches!(
            issue_token(&codec, &directory, "r1", "u2"),
            Err(AppError::Access(AccessError::Blocked))
        ));
        assert!(matches!(
            authorize(&codec, &directory, &token),
            Err(AppError::Access(AccessError::Blocked))
        ));
    }
}
