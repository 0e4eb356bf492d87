use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::message::{Message, MessageContent, Role};
use crate::errors::DomainError;

pub const MAX_SESSION_ID_CHARS: usize = 128;

/// Opaque identifier of a conversation session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidSessionId("session id must not be empty".to_owned()));
        }
        if trimmed.chars().count() > MAX_SESSION_ID_CHARS {
            return Err(DomainError::InvalidSessionId(format!(
                "session id must be at most {MAX_SESSION_ID_CHARS} characters"
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(DomainError::InvalidSessionId(
                "session id must not contain control characters".to_owned(),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted message in a session log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl SessionEntry {
    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.content.clone())
    }

    pub fn is_error(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("is_error"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Renders entries as `ROLE: content` lines, oldest first.
pub fn format_history(entries: &[SessionEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            format!("{}: {}", entry.role.as_str().to_uppercase(), entry.content.primary_text())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{format_history, SessionEntry, SessionId, MAX_SESSION_ID_CHARS};
    use crate::domain::message::{MessageContent, Role};

    #[test]
    fn session_id_rejects_empty_and_oversized_values() {
        assert!(SessionId::parse("   ").is_err());
        assert!(SessionId::parse("a".repeat(MAX_SESSION_ID_CHARS + 1)).is_err());
        assert!(SessionId::parse("line\nbreak").is_err());
        assert_eq!(SessionId::parse(" abc-123 ").expect("valid").as_str(), "abc-123");
    }

    #[test]
    fn generated_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn formatted_history_uses_uppercase_roles() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("timestamp");
        let entries = vec![
            SessionEntry {
                role: Role::User,
                content: MessageContent::from("Hello"),
                metadata: None,
                created_at: at,
            },
            SessionEntry {
                role: Role::Assistant,
                content: MessageContent::from("Hi there"),
                metadata: Some(json!({ "is_error": true })),
                created_at: at,
            },
        ];

        assert_eq!(format_history(&entries), "USER: Hello\nASSISTANT: Hi there");
        assert!(!entries[0].is_error());
        assert!(entries[1].is_error());
    }
}
