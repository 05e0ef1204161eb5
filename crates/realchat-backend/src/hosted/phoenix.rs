//! Phoenix channel frames spoken by the realtime service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use realchat_shared::time::parse_timestamp;

use crate::backend::{ChangeEvent, ChangeFilter, ChangeKind};
use crate::error::{BackendError, Result};

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const POSTGRES_CHANGES: &str = "postgres_changes";
pub const ACCESS_TOKEN: &str = "access_token";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": filter.wire_event(),
                        "schema": filter.schema,
                        "table": filter.table,
                    }],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: &str, join_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    /// Hand a joined channel a new access token.
    pub fn access_token(topic: &str, token: &str, reference: &str, join_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: ACCESS_TOKEN.to_string(),
            payload: json!({ "access_token": token }),
            reference: Some(reference.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    /// `status` of a `phx_reply`, e.g. `"ok"` or `"error"`.
    pub fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Decode a `postgres_changes` payload.
    pub fn change_event(&self) -> Result<ChangeEvent> {
        let data = self
            .payload
            .get("data")
            .cloned()
            .ok_or_else(|| BackendError::Realtime("change frame without data".into()))?;
        let data: ChangeData = serde_json::from_value(data)?;

        let commit_timestamp = data
            .commit_timestamp
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;

        Ok(ChangeEvent {
            kind: data.kind,
            schema: data.schema,
            table: data.table,
            commit_timestamp,
            new: data.record,
            old: data.old_record,
        })
    }
}

/// The `data` object of a `postgres_changes` frame.
#[derive(Debug, Deserialize)]
struct ChangeData {
    schema: String,
    table: String,
    #[serde(default)]
    commit_timestamp: Option<String>,
    #[serde(rename = "type", alias = "eventType")]
    kind: ChangeKind,
    #[serde(default, alias = "new")]
    record: Value,
    #[serde(default, alias = "old")]
    old_record: Value,
}

/// Monotonic message references.
#[derive(Debug, Default)]
pub struct RefCounter(u64);

impl RefCounter {
    pub fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}
