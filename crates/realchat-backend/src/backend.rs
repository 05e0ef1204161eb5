//! The client-side contract of the managed backend.
//!
//! Everything the chat front-end needs from the outside world goes through
//! [`ChatBackend`]: ordered row queries, row inserts, change subscriptions
//! and the auth session. Implementations are [`crate::HostedBackend`] for a
//! real deployment and [`crate::InMemoryBackend`] for offline use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use realchat_shared::constants::{DEFAULT_MESSAGES_TABLE, DEFAULT_ORDER_COLUMN, DEFAULT_SCHEMA};
use realchat_shared::{Credentials, Message, NewMessage, Session, User};

use crate::error::Result;
use crate::subscription::{AuthSubscription, ChangeSubscription};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// "Select all rows of `table` ordered by `order_column`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub table: String,
    pub order_column: String,
    pub ascending: bool,
}

impl SelectQuery {
    /// Full history of `table`, oldest first.
    pub fn chronological(table: impl Into<String>, order_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            order_column: order_column.into(),
            ascending: true,
        }
    }

    /// PostgREST `order` parameter value.
    pub fn order_param(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}", self.order_column, direction)
    }
}

impl Default for SelectQuery {
    fn default() -> Self {
        Self::chronological(DEFAULT_MESSAGES_TABLE, DEFAULT_ORDER_COLUMN)
    }
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which changes a subscription wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub schema: String,
    pub table: String,
    /// `None` listens to every kind.
    pub event: Option<ChangeKind>,
}

impl ChangeFilter {
    pub fn all(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            event: None,
        }
    }

    pub fn only(schema: impl Into<String>, table: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            event: Some(kind),
            ..Self::all(schema, table)
        }
    }

    /// Event name as sent in a realtime join (`*` for all).
    pub fn wire_event(&self) -> &'static str {
        match self.event {
            None => "*",
            Some(ChangeKind::Insert) => "INSERT",
            Some(ChangeKind::Update) => "UPDATE",
            Some(ChangeKind::Delete) => "DELETE",
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.schema == event.schema
            && self.table == event.table
            && self.event.map_or(true, |kind| kind == event.kind)
    }
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self::all(DEFAULT_SCHEMA, DEFAULT_MESSAGES_TABLE)
    }
}

/// One row-level change delivered by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    pub commit_timestamp: Option<DateTime<Utc>>,
    /// The row after the change (empty object for deletes).
    pub new: serde_json::Value,
    /// The row before the change, as far as the backend reports it.
    pub old: serde_json::Value,
}

impl ChangeEvent {
    /// Insert event carrying `message` as its new row.
    pub fn insert(schema: &str, table: &str, message: &Message) -> Result<Self> {
        Ok(Self {
            kind: ChangeKind::Insert,
            schema: schema.to_string(),
            table: table.to_string(),
            commit_timestamp: Some(message.created_at),
            new: serde_json::to_value(message)?,
            old: serde_json::Value::Object(Default::default()),
        })
    }
}

// ---------------------------------------------------------------------------
// Auth notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// Delivered once, right after a listener registers.
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A session-change notification. The session is the complete new state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

/// Result of a sign-up request.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    /// The account was created and is signed in.
    SignedIn(Session),
    /// The account was created but must confirm its email first.
    ConfirmationRequired { user: User },
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetch every row of the query's table in the requested order.
    async fn select_messages(&self, query: &SelectQuery) -> Result<Vec<Message>>;

    /// Insert one row. On success the backend emits an insert event to
    /// subscribers.
    async fn insert_message(&self, table: &str, row: &NewMessage) -> Result<()>;

    /// Open a change subscription.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription>;

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome>;

    /// End the session. Listeners observe `SignedOut`.
    async fn sign_out(&self) -> Result<()>;

    /// Register a session listener. The first notification is always
    /// [`AuthEvent::InitialSession`].
    fn on_auth_state_change(&self) -> AuthSubscription;

    fn current_session(&self) -> Option<Session>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: ChangeKind, table: &str) -> ChangeEvent {
        ChangeEvent {
            kind,
            schema: "public".into(),
            table: table.into(),
            commit_timestamp: None,
            new: json!({}),
            old: json!({}),
        }
    }

    #[test]
    fn test_order_param() {
        let mut q = SelectQuery::default();
        assert_eq!(q.order_param(), "created_at.asc");
        q.ascending = false;
        assert_eq!(q.order_param(), "created_at.desc");
    }

    #[test]
    fn test_filter_matching() {
        let all = ChangeFilter::default();
        assert!(all.matches(&event(ChangeKind::Insert, "messages")));
        assert!(all.matches(&event(ChangeKind::Delete, "messages")));
        assert!(!all.matches(&event(ChangeKind::Insert, "profiles")));

        let inserts = ChangeFilter::only("public", "messages", ChangeKind::Insert);
        assert_eq!(inserts.wire_event(), "INSERT");
        assert!(!inserts.matches(&event(ChangeKind::Update, "messages")));
    }

    #[test]
    fn test_change_kind_wire_names() {
        let kind: ChangeKind = serde_json::from_str("\"INSERT\"").unwrap();
        assert_eq!(kind, ChangeKind::Insert);
        assert_eq!(serde_json::to_string(&ChangeKind::Delete).unwrap(), "\"DELETE\"");
    }
}
