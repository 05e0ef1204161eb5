//! Password auth against the hosted auth service.
//!
//! The client keeps the current session in memory, notifies session
//! listeners on every change, and refreshes the access token shortly before
//! it expires. A rejected refresh ends the session.

use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use realchat_shared::constants::TOKEN_REFRESH_MARGIN_SECS;
use realchat_shared::{Credentials, Session, User};

use crate::backend::{AuthChange, AuthEvent, SignUpOutcome};
use crate::error::{AuthError, AuthErrorKind, BackendError, Result};
use crate::subscription::{AuthSubscription, ListenerRegistry};

/// Successful token grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    /// Unix seconds.
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

struct AuthInner {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
    listeners: ListenerRegistry<AuthChange>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for AuthInner {
    fn drop(&mut self) {
        if let Ok(mut task) = self.refresh_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Auth service client. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<AuthInner>,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, base: Url, anon_key: String) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                http,
                base,
                anon_key,
                session: RwLock::new(None),
                listeners: ListenerRegistry::new(),
                refresh_task: Mutex::new(None),
            }),
        }
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Bearer token for data requests: the session's access token, or the
    /// anon key when signed out.
    pub fn bearer_token(&self) -> String {
        self.current_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.inner.anon_key.clone())
    }

    pub fn on_auth_state_change(&self) -> AuthSubscription {
        let initial = AuthChange {
            event: AuthEvent::InitialSession,
            session: self.current_session(),
        };
        self.inner.listeners.subscribe(Some(initial))
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session> {
        let url = self.endpoint("token?grant_type=password")?;
        let response = self.post(url, None).json(credentials).send().await?;
        let body = read_success(response).await?;

        let grant: TokenResponse = serde_json::from_str(&body)?;
        let session = grant.into_session(Utc::now());
        info!(user = %session.user.id, "Signed in");
        self.store_session(Some(session.clone()), AuthEvent::SignedIn);
        Ok(session)
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome> {
        let url = self.endpoint("signup")?;
        let response = self.post(url, None).json(credentials).send().await?;
        let body = read_success(response).await?;

        // With email confirmation enabled the service answers with the bare
        // user instead of a token grant.
        let value: serde_json::Value = serde_json::from_str(&body)?;
        if value.get("access_token").is_some() {
            let grant: TokenResponse = serde_json::from_value(value)?;
            let session = grant.into_session(Utc::now());
            info!(user = %session.user.id, "Signed up");
            self.store_session(Some(session.clone()), AuthEvent::SignedIn);
            Ok(SignUpOutcome::SignedIn(session))
        } else {
            let user: User = serde_json::from_value(value)?;
            info!(user = %user.id, "Signed up, email confirmation pending");
            Ok(SignUpOutcome::ConfirmationRequired { user })
        }
    }

    /// Revoke the session server-side and forget it locally.
    ///
    /// The local session is cleared and `SignedOut` emitted even when the
    /// server call fails; a token the server no longer knows about is not an
    /// error.
    pub async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.current_session() else {
            self.store_session(None, AuthEvent::SignedOut);
            return Ok(());
        };

        let url = self.endpoint("logout")?;
        let result = match self.post(url, Some(&session.access_token)).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match read_success(response).await {
                    Ok(_) => Ok(()),
                    Err(_) if status == 401 || status == 404 => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(BackendError::Http(e)),
        };

        self.store_session(None, AuthEvent::SignedOut);
        info!(user = %session.user.id, "Signed out");
        result
    }

    /// Exchange the refresh token for a new session.
    ///
    /// If the service rejects the refresh token the session is removed and
    /// listeners observe `SignedOut`.
    pub async fn refresh_session(&self) -> Result<Session> {
        let current = self.current_session().ok_or(BackendError::NoSession)?;

        let url = self.endpoint("token?grant_type=refresh_token")?;
        let response = self
            .post(url, None)
            .json(&json!({ "refresh_token": current.refresh_token }))
            .send()
            .await?;

        match read_success(response).await {
            Ok(body) => {
                let grant: TokenResponse = serde_json::from_str(&body)?;
                let session = grant.into_session(Utc::now());
                debug!(user = %session.user.id, "Access token refreshed");
                self.store_session(Some(session.clone()), AuthEvent::TokenRefreshed);
                Ok(session)
            }
            Err(BackendError::Auth(e)) if is_terminal_refresh_error(&e) => {
                warn!(error = %e, "Refresh token rejected, ending session");
                self.store_session(None, AuthEvent::SignedOut);
                Err(BackendError::Auth(e))
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.inner.base.join(path)?)
    }

    fn post(&self, url: Url, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let bearer = bearer.unwrap_or(&self.inner.anon_key);
        self.inner
            .http
            .post(url)
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(bearer)
    }

    fn store_session(&self, session: Option<Session>, event: AuthEvent) {
        {
            let mut slot = self.inner.session.write().unwrap_or_else(|p| p.into_inner());
            *slot = session.clone();
        }
        self.schedule_refresh(session.as_ref());

        let delivered = self.inner.listeners.notify(&AuthChange { event, session });
        debug!(?event, listeners = delivered, "Auth state change delivered");
    }

    /// Replace the pending refresh with one due `TOKEN_REFRESH_MARGIN_SECS`
    /// ahead of `session`'s expiry.
    fn schedule_refresh(&self, session: Option<&Session>) {
        let mut slot = self.inner.refresh_task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }

        let Some(due) = session.and_then(|s| s.refresh_due(Duration::seconds(TOKEN_REFRESH_MARGIN_SECS)))
        else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, automatic token refresh disabled");
            return;
        };

        let delay = (due - Utc::now()).to_std().unwrap_or_default();
        let weak: Weak<AuthInner> = Arc::downgrade(&self.inner);
        *slot = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let client = AuthClient { inner };
            // Detach ourselves first so storing the refreshed session does
            // not abort this task.
            client
                .inner
                .refresh_task
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
            if let Err(e) = client.refresh_session().await {
                warn!(error = %e, "Automatic token refresh failed");
            }
        }));
    }
}

fn is_terminal_refresh_error(e: &AuthError) -> bool {
    e.kind == AuthErrorKind::SessionMissing || matches!(e.status, Some(400) | Some(401))
}

/// Body of a 2xx response, or the classified auth error.
async fn read_success(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(AuthError::from_response(status.as_u16(), &body).into())
    }
}
