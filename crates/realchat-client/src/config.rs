//! Client configuration loaded from environment variables.
//!
//! Everything except the backend location has a default, and
//! `REALCHAT_OFFLINE=1` runs against a process-local backend with no
//! configuration at all.

use tracing::warn;

use realchat_backend::HostedConfig;
use realchat_shared::constants::{DEFAULT_MESSAGES_TABLE, DEFAULT_ORDER_COLUMN, DEFAULT_SCHEMA};

use crate::error::ConfigError;
use crate::shell::ShellConfig;
use crate::state::DuplicatePolicy;

const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 24;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the hosted project.
    /// Env: `REALCHAT_URL`
    pub backend_url: Option<String>,

    /// Public API key of the hosted project.
    /// Env: `REALCHAT_ANON_KEY`
    pub anon_key: Option<String>,

    /// Env: `REALCHAT_TABLE`
    /// Default: `messages`
    pub table: String,

    /// Env: `REALCHAT_SCHEMA`
    /// Default: `public`
    pub schema: String,

    /// Env: `REALCHAT_ORDER_COLUMN`
    /// Default: `created_at`
    pub order_column: String,

    /// Drop live inserts whose id is already displayed.
    /// Env: `REALCHAT_DEDUPE` (true/false)
    /// Default: `true`
    pub dedupe: bool,

    /// Use the in-memory backend instead of a hosted project.
    /// Env: `REALCHAT_OFFLINE` (true/false)
    /// Default: `false`
    pub offline: bool,

    /// Terminal columns.
    /// Env: `REALCHAT_WIDTH`, then `COLUMNS`
    /// Default: the terminal's size, or 80
    pub width: Option<usize>,

    /// Terminal rows.
    /// Env: `REALCHAT_HEIGHT`, then `LINES`
    /// Default: the terminal's size, or 24
    pub height: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            table: DEFAULT_MESSAGES_TABLE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            order_column: DEFAULT_ORDER_COLUMN.to_string(),
            dedupe: true,
            offline: false,
            width: None,
            height: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        config.backend_url = value("REALCHAT_URL");
        config.anon_key = value("REALCHAT_ANON_KEY");

        if let Some(table) = value("REALCHAT_TABLE") {
            config.table = table;
        }
        if let Some(schema) = value("REALCHAT_SCHEMA") {
            config.schema = schema;
        }
        if let Some(column) = value("REALCHAT_ORDER_COLUMN") {
            config.order_column = column;
        }

        if let Some(raw) = value("REALCHAT_DEDUPE") {
            config.dedupe = parse_flag("REALCHAT_DEDUPE", &raw).unwrap_or(config.dedupe);
        }
        if let Some(raw) = value("REALCHAT_OFFLINE") {
            config.offline = parse_flag("REALCHAT_OFFLINE", &raw).unwrap_or(config.offline);
        }

        config.width = ["REALCHAT_WIDTH", "COLUMNS"]
            .into_iter()
            .find_map(|key| value(key).and_then(|raw| parse_size(key, &raw)));
        config.height = ["REALCHAT_HEIGHT", "LINES"]
            .into_iter()
            .find_map(|key| value(key).and_then(|raw| parse_size(key, &raw)));

        config
    }

    /// Connection settings for the hosted backend.
    pub fn hosted(&self) -> Result<HostedConfig, ConfigError> {
        let url = self
            .backend_url
            .as_deref()
            .ok_or(ConfigError::Missing("REALCHAT_URL"))?;
        let key = self
            .anon_key
            .as_deref()
            .ok_or(ConfigError::Missing("REALCHAT_ANON_KEY"))?;
        Ok(HostedConfig::new(url, key)?)
    }

    pub fn shell(&self) -> ShellConfig {
        ShellConfig {
            table: self.table.clone(),
            schema: self.schema.clone(),
            order_column: self.order_column.clone(),
            duplicates: if self.dedupe {
                DuplicatePolicy::SkipKnownIds
            } else {
                DuplicatePolicy::Append
            },
        }
    }

    /// Terminal size, preferring configured values over the detected one.
    pub fn terminal_size(&self, detected: Option<(usize, usize)>) -> (usize, usize) {
        let (cols, rows) = detected.unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        (self.width.unwrap_or(cols), self.height.unwrap_or(rows))
    }
}

fn parse_flag(key: &str, raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = raw, "Ignoring malformed boolean");
            None
        }
    }
}

fn parse_size(key: &str, raw: &str) -> Option<usize> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(key, value = raw, "Ignoring malformed size");
            None
        }
    }
}
