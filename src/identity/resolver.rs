//! Extraction of the caller's identity from a bearer credential.
//!
//! The credential is a three-segment signed token. Only the payload segment is
//! decoded here; signature validation belongs to the auth service that issued
//! the token.

use super::UserId;
use crate::utils::{IdentityError, Result};
use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine,
};
use std::fmt;

/// Claims checked for the user id, in order
pub const USER_ID_CLAIMS: [&str; 3] = ["id", "userId", "sub"];

/// URL-safe base64 that tolerates both padded and unpadded input
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// An opaque bearer token as issued by the auth service
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token, trimming surrounding whitespace
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    /// Raw token text, as sent in the `Authorization` header
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// The authenticated local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User id claimed by the credential
    pub user_id: UserId,
    /// Credential the id was read from
    pub credential: Credential,
}

/// Resolve the caller's identity from an optional credential.
///
/// Pure function of its input. Fails when the credential is absent, is not a
/// `header.payload.signature` token, or its payload is not a JSON object with
/// a usable id claim.
pub fn resolve(credential: Option<&str>) -> Result<Identity> {
    let credential = credential
        .map(Credential::new)
        .filter(|c| !c.as_str().is_empty())
        .ok_or(IdentityError::MissingCredential)?;

    let segments: Vec<&str> = credential.as_str().split('.').collect();
    if segments.len() != 3 {
        return Err(IdentityError::Malformed {
            reason: format!("expected 3 segments, found {}", segments.len()),
        }
        .into());
    }

    let payload = PAYLOAD_ENGINE
        .decode(segments[1])
        .map_err(|e| IdentityError::Malformed {
            reason: format!("payload is not base64url: {e}"),
        })?;

    let claims: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| IdentityError::Malformed {
            reason: format!("payload is not JSON: {e}"),
        })?;

    let claims = claims.as_object().ok_or_else(|| IdentityError::Malformed {
        reason: "payload is not a JSON object".to_string(),
    })?;

    let (claim, value) = USER_ID_CLAIMS
        .iter()
        .find_map(|claim| claims.get(*claim).filter(|v| !v.is_null()).map(|v| (*claim, v)))
        .ok_or(IdentityError::MissingClaim)?;
    let user_id = UserId::from_json(value).ok_or_else(|| IdentityError::Malformed {
        reason: format!("claim `{claim}` is not a usable user id"),
    })?;

    log::debug!("Resolved identity for user {}", user_id);
    Ok(Identity {
        user_id,
        credential,
    })
}
