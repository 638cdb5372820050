//! Signature tokens authorizing a single connection upgrade.
//!
//! - **Generation**: `HMAC-SHA256(secret, room_id || user_id || role || timestamp)`, hex-encoded
//! - **Validation**: recompute and compare in constant time via `ring::hmac::verify`
//!
//! The role is part of the signed payload, so a caller cannot raise its role
//! without invalidating the token. Tokens carry no expiry.

use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::SignatureError;
use crate::types::Role;

/// Fields bound together by a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub room_id: String,
    pub user_id: String,
    pub role: Role,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

/// A signed request, as carried in the upgrade query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureToken {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub signature: String,
}

impl SignatureToken {
    /// The signed fields without the signature
    pub fn request(&self) -> SignatureRequest {
        SignatureRequest {
            room_id: self.room_id.clone(),
            user_id: self.user_id.clone(),
            role: self.role,
            timestamp: self.timestamp,
        }
    }

    /// Encode as an URL query string (`roomId=..&userId=..`)
    pub fn to_query(&self) -> Result<String, serde_urlencoded::ser::Error> {
        serde_urlencoded::to_string(self)
    }
}

/// Generates and validates signature tokens with one shared secret.
pub struct SignatureCodec {
    key: hmac::Key,
}

impl SignatureCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Sign a request.
    ///
    /// Fails with `MissingFields` unless room id, user id and timestamp are set.
    pub fn generate(&self, request: SignatureRequest) -> Result<SignatureToken, SignatureError> {
        check_required(&request)?;

        let tag = hmac::sign(&self.key, signing_payload(&request).as_bytes());

        Ok(SignatureToken {
            room_id: request.room_id,
            user_id: request.user_id,
            role: request.role,
            timestamp: request.timestamp,
            signature: hex::encode(tag.as_ref()),
        })
    }

    /// Check that `token.signature` matches its fields.
    pub fn validate(&self, token: &SignatureToken) -> Result<(), SignatureError> {
        let request = token.request();
        check_required(&request)?;

        let provided =
            hex::decode(&token.signature).map_err(|_| SignatureError::InvalidSignature)?;

        hmac::verify(&self.key, signing_payload(&request).as_bytes(), &provided)
            .map_err(|_| SignatureError::InvalidSignature)
    }
}

impl std::fmt::Debug for SignatureCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureCodec")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn check_required(request: &SignatureRequest) -> Result<(), SignatureError> {
    if request.room_id.is_empty() || request.user_id.is_empty() || request.timestamp == 0 {
        return Err(SignatureError::MissingFields);
    }
    Ok(())
}

fn signing_payload(request: &SignatureRequest) -> String {
    format!(
        "{}{}{}{}",
        request.room_id,
        request.user_id,
        request.role.bits(),
        request.timestamp
    )
}
