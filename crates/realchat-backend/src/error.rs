use serde::Deserialize;
use thiserror::Error;

use realchat_shared::SharedError;

/// Errors produced by backend clients.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The auth service rejected the request.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid row: {0}")]
    Row(#[from] SharedError),

    /// The operation needs an authenticated session.
    #[error("Not signed in")]
    NoSession,

    /// The backend is unreachable or refused to serve the request.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether the failure means "these credentials match no account".
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, BackendError::Auth(e) if e.kind == AuthErrorKind::InvalidCredentials)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Auth errors
// ---------------------------------------------------------------------------

/// Classified auth failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Email/password pair matches no account.
    InvalidCredentials,
    EmailNotConfirmed,
    UserAlreadyExists,
    WeakPassword,
    RateLimited,
    /// The session or refresh token is unknown to the server.
    SessionMissing,
    Other,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

/// Error body shapes returned by the auth service across versions.
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    error_code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an error response.
    ///
    /// Structured `error_code`s win; older servers only send a description,
    /// in which case the message text decides.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: AuthErrorBody = serde_json::from_str(body).unwrap_or_default();

        let message = parsed
            .msg
            .clone()
            .or_else(|| parsed.error_description.clone())
            .or_else(|| parsed.message.clone())
            .or_else(|| parsed.error.clone())
            .unwrap_or_else(|| format!("HTTP {status}"));

        let kind = parsed
            .error_code
            .as_deref()
            .and_then(kind_from_code)
            .unwrap_or_else(|| kind_from_text(status, &message));

        Self {
            kind,
            status: Some(status),
            message,
        }
    }
}

fn kind_from_code(code: &str) -> Option<AuthErrorKind> {
    let kind = match code {
        "invalid_credentials" => AuthErrorKind::InvalidCredentials,
        "email_not_confirmed" => AuthErrorKind::EmailNotConfirmed,
        "user_already_exists" | "email_exists" => AuthErrorKind::UserAlreadyExists,
        "weak_password" => AuthErrorKind::WeakPassword,
        "over_request_rate_limit" | "over_email_send_rate_limit" => AuthErrorKind::RateLimited,
        "session_not_found" | "refresh_token_not_found" | "refresh_token_already_used" => {
            AuthErrorKind::SessionMissing
        }
        _ => return None,
    };
    Some(kind)
}

fn kind_from_text(status: u16, message: &str) -> AuthErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid login") {
        AuthErrorKind::InvalidCredentials
    } else if lower.contains("email not confirmed") {
        AuthErrorKind::EmailNotConfirmed
    } else if lower.contains("already registered") {
        AuthErrorKind::UserAlreadyExists
    } else if lower.contains("invalid refresh token") {
        AuthErrorKind::SessionMissing
    } else if status == 429 {
        AuthErrorKind::RateLimited
    } else {
        AuthErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wins() {
        let body = r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#;
        let err = AuthError::from_response(400, body);
        assert_eq!(err.kind, AuthErrorKind::InvalidCredentials);
        assert_eq!(err.message, "Invalid login credentials");
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn test_legacy_grant_error_falls_back_to_text() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        let err = AuthError::from_response(400, body);
        assert_eq!(err.kind, AuthErrorKind::InvalidCredentials);
    }

    #[test]
    fn test_unconfirmed_email_is_not_invalid_credentials() {
        let body = r#"{"error_code":"email_not_confirmed","msg":"Email not confirmed"}"#;
        let err = BackendError::from(AuthError::from_response(400, body));
        assert!(!err.is_invalid_credentials());
    }

    #[test]
    fn test_unparseable_body() {
        let err = AuthError::from_response(429, "<html>slow down</html>");
        assert_eq!(err.kind, AuthErrorKind::RateLimited);
        assert_eq!(err.message, "HTTP 429");
    }

    #[test]
    fn test_user_already_registered() {
        let body = r#"{"code":422,"msg":"User already registered"}"#;
        let err = AuthError::from_response(422, body);
        assert_eq!(err.kind, AuthErrorKind::UserAlreadyExists);
    }
}
