//! Local identity and participant types.
//!
//! The client never verifies credentials itself; it only needs the caller's
//! user id out of the bearer token and the peer's public profile out of the
//! directory.

pub mod resolver;

pub use resolver::*;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Largest float magnitude at which every integer is still representable
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// A user identifier as issued by the backend.
///
/// The backend hands out ids either as JSON numbers or as strings. The textual
/// form is what identifies the user; the original shape is kept only so the
/// id is written back to the wire the way it was received.
#[derive(Clone)]
pub struct UserId {
    text: String,
    numeric: bool,
}

impl UserId {
    /// Create a textual id
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            numeric: false,
        }
    }

    /// Create an id that serializes as a JSON number
    pub fn numeric(value: i64) -> Self {
        Self {
            text: value.to_string(),
            numeric: true,
        }
    }

    /// Textual form of the id
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the id was received as a JSON number
    pub fn is_numeric(&self) -> bool {
        self.numeric
    }

    /// Whether the id carries no characters
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Convert a JSON claim or field into an id.
    ///
    /// Accepts non-empty strings and integral numbers (including unsigned
    /// values above `i64::MAX` and floats such as `1.0`); everything else
    /// yields `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.trim())),
            serde_json::Value::Number(n) => Self::from_number(n),
            _ => None,
        }
    }

    fn from_number(n: &serde_json::Number) -> Option<Self> {
        let text = if let Some(value) = n.as_i64() {
            value.to_string()
        } else if let Some(value) = n.as_u64() {
            value.to_string()
        } else {
            let value = n.as_f64()?;
            // Past 2^53 a float no longer names a single integer.
            if value.fract() != 0.0 || value.abs() > MAX_EXACT_FLOAT {
                return None;
            }
            format!("{value:.0}")
        };
        Some(Self { text, numeric: true })
    }
}

impl PartialEq for UserId {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for UserId {}

impl Hash for UserId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for UserId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UserId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.text)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for UserId {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self::numeric(value)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.numeric {
            if let Ok(value) = self.text.parse::<i64>() {
                return serializer.serialize_i64(value);
            }
            if let Ok(value) = self.text.parse::<u64>() {
                return serializer.serialize_u64(value);
            }
        }
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid user id: {value}")))
    }
}

/// Public profile of a conversation participant, as returned by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawParticipant")]
pub struct Participant {
    /// Backend user id (`id`, or the document key `_id`)
    pub id: UserId,
    /// Name shown in the conversation header (`name` on the wire)
    pub display_name: String,
    /// Avatar image reference, usually a URL (`profilePic` on the wire)
    pub avatar_ref: String,
}

/// Directory payload as received; documents may carry `id`, `_id` or both
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParticipant {
    #[serde(default)]
    id: Option<UserId>,
    #[serde(default, rename = "_id")]
    document_id: Option<UserId>,
    #[serde(default, alias = "name")]
    display_name: String,
    #[serde(default, alias = "profilePic")]
    avatar_ref: String,
}

impl TryFrom<RawParticipant> for Participant {
    type Error = String;

    fn try_from(raw: RawParticipant) -> std::result::Result<Self, Self::Error> {
        let id = raw
            .id
            .or(raw.document_id)
            .ok_or_else(|| "missing field `id`".to_string())?;
        Ok(Self {
            id,
            display_name: raw.display_name,
            avatar_ref: raw.avatar_ref,
        })
    }
}

impl Participant {
    /// Create a participant
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: String::new(),
        }
    }

    /// Set the avatar reference
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = avatar_ref.into();
        self
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_and_textual_ids_compare_by_text() {
        assert_eq!(UserId::numeric(1), UserId::new("1"));
        assert!(UserId::new("10") < UserId::new("9"));
    }

    #[test]
    fn test_user_id_keeps_wire_shape() {
        assert_eq!(serde_json::to_value(UserId::numeric(7)).unwrap(), json!(7));
        assert_eq!(serde_json::to_value(UserId::new("7")).unwrap(), json!("7"));

        let id: UserId = serde_json::from_value(json!(42)).unwrap();
        assert!(id.is_numeric());
        assert!(serde_json::from_value::<UserId>(json!(null)).is_err());
        assert!(serde_json::from_value::<UserId>(json!("")).is_err());
    }

    #[test]
    fn test_participant_accepts_backend_field_names() {
        let participant: Participant = serde_json::from_value(json!({
            "_id": "66a1f",
            "name": "Bob",
            "profilePic": "https://cdn.example.com/bob.png",
            "email": "bob@example.com"
        }))
        .unwrap();

        assert_eq!(participant.id, UserId::new("66a1f"));
        assert_eq!(participant.display_name, "Bob");
        assert_eq!(participant.avatar_ref, "https://cdn.example.com/bob.png");
    }

    #[test]
    fn test_participant_with_both_id_fields() {
        let participant: Participant = serde_json::from_value(json!({
            "_id": "66a1",
            "id": "66a1",
            "name": "Bob"
        }))
        .unwrap();
        assert_eq!(participant.id, UserId::new("66a1"));

        assert!(serde_json::from_value::<Participant>(json!({ "name": "nobody" })).is_err());
    }

    #[test]
    fn test_wide_and_float_numeric_ids() {
        let wide = UserId::from_json(&json!(18_446_744_073_709_551_615u64)).unwrap();
        assert_eq!(wide.as_str(), "18446744073709551615");
        assert!(wide.is_numeric());
        assert_eq!(
            serde_json::to_value(&wide).unwrap(),
            json!(18_446_744_073_709_551_615u64)
        );

        let float = UserId::from_json(&json!(1.0)).unwrap();
        assert_eq!(float, UserId::numeric(1));
        assert!(UserId::from_json(&json!(1.5)).is_none());
    }
}
