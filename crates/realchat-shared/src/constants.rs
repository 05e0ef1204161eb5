/// Application name
pub const APP_NAME: &str = "Real-time Chat";

/// Collection holding chat messages
pub const DEFAULT_MESSAGES_TABLE: &str = "messages";

/// Database schema the collection lives in
pub const DEFAULT_SCHEMA: &str = "public";

/// Column the history is ordered by
pub const DEFAULT_ORDER_COLUMN: &str = "created_at";

/// Realtime heartbeat interval in seconds
pub const REALTIME_HEARTBEAT_SECS: u64 = 30;

/// Realtime protocol version advertised on connect
pub const REALTIME_VSN: &str = "1.0.0";

/// How long before expiry an access token is refreshed, in seconds
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Share of the view width a message bubble may occupy, in percent
pub const BUBBLE_MAX_WIDTH_PERCENT: usize = 70;

/// Separator between author label and relative time in a bubble caption
pub const CAPTION_SEPARATOR: &str = " • ";
