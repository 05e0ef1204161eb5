use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::SharedError;
use crate::time::deserialize_timestamp;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Account identifier assigned by the auth service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, server-assigned message identifier.
///
/// Backends hand these out as UUID strings or as integer sequences; both are
/// kept in their textual form.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => MessageId(s),
            Raw::Signed(n) => MessageId(n.to_string()),
            Raw::Unsigned(n) => MessageId(n.to_string()),
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A chat message as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub user_id: UserId,
    /// Display label of the author. Empty when the column is null.
    #[serde(default, deserialize_with = "deserialize_label")]
    pub user_email: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Decode a row payload as delivered by a query or a change event.
    pub fn from_row(row: serde_json::Value) -> Result<Self, SharedError> {
        serde_json::from_value(row).map_err(|e| SharedError::InvalidRow(e.to_string()))
    }

    pub fn is_authored_by(&self, user: &UserId) -> bool {
        self.user_id == *user
    }
}

/// A nullable text column, with null read as empty.
fn deserialize_label<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The row written when a user sends a message. Id and timestamp are
/// assigned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    pub user_id: UserId,
    pub user_email: String,
}

impl NewMessage {
    /// Build the row for `draft` sent as `session`'s user.
    ///
    /// Returns `None` when the draft is empty after trimming.
    pub fn compose(draft: &str, session: &Session) -> Option<Self> {
        let content = draft.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            content: content.to_string(),
            user_id: session.user.id,
            user_email: session.user.email.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// The authenticated account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    #[serde(default, deserialize_with = "deserialize_label")]
    pub email: String,
}

/// An authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token stops being accepted. `None` for sessions
    /// that never expire (local backends).
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn email(&self) -> &str {
        &self.user.email
    }

    /// Instant at which the token should be refreshed, `margin` ahead of
    /// its expiry.
    pub fn refresh_due(&self, margin: Duration) -> Option<DateTime<Utc>> {
        self.expires_at.map(|at| at - margin)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Email and password as typed into the sign-in form.
#[derive(Clone, Default, Serialize, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Both fields are required before the form can be submitted.
    pub fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: None,
            user: User {
                id: UserId::new(),
                email: "ada@example.com".into(),
            },
        }
    }

    #[test]
    fn test_message_from_row() {
        let row = json!({
            "id": "5b0c2f6e-8a43-4c1e-9d3a-2f1f4ad0c001",
            "content": "hello",
            "user_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "user_email": "ada@example.com",
            "created_at": "2024-03-01T10:15:00.123456+00:00"
        });

        let msg = Message::from_row(row).unwrap();
        assert_eq!(msg.id, MessageId::from("5b0c2f6e-8a43-4c1e-9d3a-2f1f4ad0c001"));
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.user_email, "ada@example.com");
    }

    #[test]
    fn test_numeric_message_id() {
        let row = json!({
            "id": 42,
            "content": "hi",
            "user_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "user_email": "bob@example.com",
            "created_at": "2024-03-01T10:15:00Z"
        });

        let msg = Message::from_row(row).unwrap();
        assert_eq!(msg.id.to_string(), "42");
    }

    #[test]
    fn test_null_email_reads_as_empty_label() {
        let row = json!({
            "id": 7,
            "content": "anonymous",
            "user_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "user_email": null,
            "created_at": "2024-03-01T10:15:00Z"
        });

        let msg = Message::from_row(row).unwrap();
        assert_eq!(msg.user_email, "");

        let user: User = serde_json::from_value(json!({
            "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "email": null
        }))
        .unwrap();
        assert_eq!(user.email, "");
    }

    #[test]
    fn test_row_without_content_is_rejected() {
        let row = json!({ "id": "x", "user_id": "0f8fad5b-d9cb-469f-a165-70867728950e" });
        assert!(matches!(
            Message::from_row(row),
            Err(SharedError::InvalidRow(_))
        ));
    }

    #[test]
    fn test_compose_trims_content() {
        let s = session();
        let row = NewMessage::compose("  hello there \n", &s).unwrap();
        assert_eq!(row.content, "hello there");
        assert_eq!(row.user_id, s.user.id);
        assert_eq!(row.user_email, "ada@example.com");
    }

    #[test]
    fn test_compose_rejects_blank_draft() {
        let s = session();
        assert!(NewMessage::compose("", &s).is_none());
        assert!(NewMessage::compose(" \t\n ", &s).is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("ada@example.com", "hunter2");
        let printed = format!("{creds:?} {:?}", session());
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("access\""));
        assert!(printed.contains("ada@example.com"));
    }

    #[test]
    fn test_credentials_complete() {
        assert!(Credentials::new("a@b.c", "pw").is_complete());
        assert!(!Credentials::new("  ", "pw").is_complete());
        assert!(!Credentials::new("a@b.c", "").is_complete());
    }
}
