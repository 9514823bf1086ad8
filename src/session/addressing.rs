//! Canonical conversation addressing.
//!
//! A two-party conversation is identified by a key that does not depend on
//! which participant opened it: `room_key(a, b) == room_key(b, a)`.

use crate::identity::UserId;
use crate::utils::{AddressingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the two ordered ids
pub const KEY_SEPARATOR: char = '_';

/// Canonical, order-independent identifier of a two-party conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Key as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participant ids in canonical order
    pub fn participants(&self) -> (&str, &str) {
        // Construction guarantees exactly one separator.
        self.0
            .split_once(KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    /// Whether `id` is one of the two participants
    pub fn involves(&self, id: &UserId) -> bool {
        let (first, second) = self.participants();
        first == id.as_str() || second == id.as_str()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the conversation key for two participants.
///
/// The textual ids are sorted byte-wise and joined with [`KEY_SEPARATOR`].
/// Ids that are empty or contain the separator are rejected, which keeps the
/// mapping from unordered pairs to keys injective.
pub fn room_key(a: &UserId, b: &UserId) -> Result<ConversationKey> {
    check(a)?;
    check(b)?;

    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Ok(ConversationKey(format!(
        "{}{}{}",
        first.as_str(),
        KEY_SEPARATOR,
        second.as_str()
    )))
}

fn check(id: &UserId) -> Result<()> {
    if id.is_empty() {
        return Err(AddressingError::EmptyId.into());
    }
    if id.as_str().contains(KEY_SEPARATOR) {
        return Err(AddressingError::ReservedSeparator {
            id: id.to_string(),
            separator: KEY_SEPARATOR,
        }
        .into());
    }
    Ok(())
}
