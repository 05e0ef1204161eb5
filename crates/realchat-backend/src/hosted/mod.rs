//! Client for a hosted Supabase-compatible backend.
//!
//! Three services sit behind one base URL:
//! - `rest/v1/`: PostgREST row queries and inserts ([`RestClient`])
//! - `auth/v1/`: password auth and token refresh ([`AuthClient`])
//! - `realtime/v1/websocket`: the change feed ([`RealtimeClient`])

mod auth;
mod phoenix;
mod realtime;
mod rest;

pub use auth::AuthClient;
pub use realtime::RealtimeClient;
pub use rest::RestClient;

use async_trait::async_trait;
use url::Url;

use realchat_shared::{Credentials, Message, NewMessage, Session};

use crate::backend::{ChangeFilter, ChatBackend, SelectQuery, SignUpOutcome};
use crate::error::{BackendError, Result};
use crate::subscription::{AuthSubscription, ChangeSubscription};

/// Connection settings for a hosted project.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    pub url: Url,
    /// Public ("anon") API key.
    pub anon_key: String,
}

impl HostedConfig {
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self> {
        let mut url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BackendError::Unavailable(format!(
                "backend URL must use http or https, got {}",
                url.scheme()
            )));
        }
        // Service paths are joined relative to the base.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            url,
            anon_key: anon_key.into(),
        })
    }

    pub fn rest_url(&self) -> Result<Url> {
        Ok(self.url.join("rest/v1/")?)
    }

    pub fn auth_url(&self) -> Result<Url> {
        Ok(self.url.join("auth/v1/")?)
    }

    /// Websocket endpoint of the change feed, carrying the API key.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.url.join("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| BackendError::Realtime(format!("cannot derive websocket URL from {url}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", realchat_shared::constants::REALTIME_VSN);
        Ok(url)
    }
}

/// [`ChatBackend`] over a hosted project.
#[derive(Clone)]
pub struct HostedBackend {
    rest: RestClient,
    auth: AuthClient,
    realtime: RealtimeClient,
}

impl HostedBackend {
    pub fn new(config: HostedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("realchat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let auth = AuthClient::new(http.clone(), config.auth_url()?, config.anon_key.clone());
        let rest = RestClient::new(http, config.rest_url()?, config.anon_key.clone(), auth.clone());
        let realtime = RealtimeClient::new(config.realtime_url()?, config.anon_key, auth.clone());

        Ok(Self {
            rest,
            auth,
            realtime,
        })
    }
}

#[async_trait]
impl ChatBackend for HostedBackend {
    async fn select_messages(&self, query: &SelectQuery) -> Result<Vec<Message>> {
        self.rest.select_messages(query).await
    }

    async fn insert_message(&self, table: &str, row: &NewMessage) -> Result<()> {
        self.rest.insert(table, row).await
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        self.realtime.subscribe(filter).await
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session> {
        self.auth.sign_in_with_password(credentials).await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome> {
        self.auth.sign_up(credentials).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.auth.sign_out().await
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.auth.on_auth_state_change()
    }

    fn current_session(&self) -> Option<Session> {
        self.auth.current_session()
    }
}
