//! Row queries and inserts through the PostgREST endpoint.

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use realchat_shared::{Message, NewMessage};

use super::auth::AuthClient;
use crate::backend::SelectQuery;
use crate::error::{BackendError, Result};

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    details: Option<String>,
}

#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    auth: AuthClient,
}

impl RestClient {
    pub fn new(http: reqwest::Client, base: Url, anon_key: String, auth: AuthClient) -> Self {
        Self {
            http,
            base,
            anon_key,
            auth,
        }
    }

    /// `GET /rest/v1/{table}?select=*&order={column}.{dir}`
    pub async fn select_messages(&self, query: &SelectQuery) -> Result<Vec<Message>> {
        let mut url = self.base.join(&query.table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", &query.order_param());

        let response = self.authorized(self.http.get(url)).send().await?;
        let response = check(response).await?;

        let rows: Vec<serde_json::Value> = response.json().await?;
        let total = rows.len();
        let messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|row| match Message::from_row(row) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(table = %query.table, error = %e, "Skipping undecodable row");
                    None
                }
            })
            .collect();

        debug!(table = %query.table, count = messages.len(), total, "Fetched rows");
        Ok(messages)
    }

    /// `POST /rest/v1/{table}` without asking for the row back.
    pub async fn insert(&self, table: &str, row: &NewMessage) -> Result<()> {
        let url = self.base.join(table)?;
        let request = self
            .http
            .post(url)
            .header("Prefer", "return=minimal")
            .json(row);

        let response = self.authorized(request).send().await?;
        check(response).await?;

        debug!(table = %table, "Inserted row");
        Ok(())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(self.auth.bearer_token())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.details)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}
