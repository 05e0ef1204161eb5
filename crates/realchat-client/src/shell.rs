//! The application shell.
//!
//! [`ChatShell`] owns the backend handle, the [`ShellState`] and the two
//! live subscriptions. Mounting registers the change feed, then the session
//! listener, then runs the initial fetch; anything the feeds delivered in the
//! meantime is applied after the fetch result replaced the list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use realchat_backend::{
    AuthChange, AuthSubscription, ChangeEvent, ChangeFilter, ChangeKind, ChangeSubscription,
    ChatBackend, SelectQuery, Subscription,
};
use realchat_shared::constants::{DEFAULT_MESSAGES_TABLE, DEFAULT_ORDER_COLUMN, DEFAULT_SCHEMA};
use realchat_shared::Message;

use crate::events::ShellUpdate;
use crate::state::{AppendResult, DuplicatePolicy, ScrollRequest, ShellState};
use crate::view::View;

/// Which collection the shell shows and how it treats duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub table: String,
    pub schema: String,
    pub order_column: String,
    pub duplicates: DuplicatePolicy,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_MESSAGES_TABLE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            order_column: DEFAULT_ORDER_COLUMN.to_string(),
            duplicates: DuplicatePolicy::default(),
        }
    }
}

enum Incoming {
    Change(Option<ChangeEvent>),
    Auth(Option<AuthChange>),
}

pub struct ChatShell {
    pub(crate) backend: Arc<dyn ChatBackend>,
    pub(crate) config: ShellConfig,
    pub(crate) state: ShellState,
    changes: Option<ChangeSubscription>,
    auth: Option<AuthSubscription>,
}

impl ChatShell {
    /// Open both subscriptions and load the history.
    ///
    /// Failures are logged and leave the shell usable: a failed fetch shows
    /// an empty list, a failed change subscription shows no live inserts.
    pub async fn mount(backend: Arc<dyn ChatBackend>, config: ShellConfig) -> Self {
        let changes = match backend
            .subscribe(ChangeFilter::all(&config.schema, &config.table))
            .await
        {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(table = %config.table, error = %e, "Failed to subscribe to changes");
                None
            }
        };
        let auth = Some(backend.on_auth_state_change());

        let mut shell = Self {
            state: ShellState::new(config.duplicates),
            backend,
            config,
            changes,
            auth,
        };

        let query = SelectQuery::chronological(&shell.config.table, &shell.config.order_column);
        match shell.backend.select_messages(&query).await {
            Ok(messages) => {
                info!(count = messages.len(), table = %query.table, "Loaded history");
                shell.state.replace_messages(messages);
            }
            Err(e) => warn!(table = %query.table, error = %e, "Failed to load history"),
        }

        shell.drain_pending();
        shell
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ShellState {
        &mut self.state
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Take the pending scroll request, if the list changed since the last call.
    pub fn take_scroll(&mut self) -> Option<ScrollRequest> {
        self.state.take_scroll()
    }

    /// The current view, with relative times computed against `now`.
    pub fn view(&self, now: DateTime<Utc>) -> View {
        View::build(&self.state, now)
    }

    /// Whether either subscription can still deliver notifications.
    pub fn is_live(&self) -> bool {
        self.changes.is_some() || self.auth.is_some()
    }

    /// Wait for one notification from either feed and apply it.
    ///
    /// Returns `None` once both feeds are closed or released.
    pub async fn next_update(&mut self) -> Option<ShellUpdate> {
        if !self.is_live() {
            return None;
        }
        let incoming = tokio::select! {
            change = recv_or_pending(&mut self.changes) => Incoming::Change(change),
            auth = recv_or_pending(&mut self.auth) => Incoming::Auth(auth),
        };
        Some(self.apply(incoming))
    }

    /// Apply every notification already queued, without waiting.
    pub fn drain_pending(&mut self) -> Vec<ShellUpdate> {
        let mut updates = Vec::new();
        while let Some(change) = self.changes.as_mut().and_then(Subscription::try_recv) {
            updates.push(self.apply_change(change));
        }
        while let Some(change) = self.auth.as_mut().and_then(Subscription::try_recv) {
            updates.push(self.apply_auth(change));
        }
        updates
    }

    /// Release both subscriptions. Calling it again does nothing.
    pub fn unmount(&mut self) {
        if let Some(mut changes) = self.changes.take() {
            changes.unsubscribe();
        }
        if let Some(mut auth) = self.auth.take() {
            auth.unsubscribe();
        }
        debug!("Shell unmounted");
    }

    fn apply(&mut self, incoming: Incoming) -> ShellUpdate {
        match incoming {
            Incoming::Change(Some(event)) => self.apply_change(event),
            Incoming::Auth(Some(change)) => self.apply_auth(change),
            Incoming::Change(None) => {
                warn!("Change feed closed");
                self.changes = None;
                ShellUpdate::ChangeFeedClosed
            }
            Incoming::Auth(None) => {
                warn!("Session listener closed");
                self.auth = None;
                ShellUpdate::AuthFeedClosed
            }
        }
    }

    fn apply_change(&mut self, event: ChangeEvent) -> ShellUpdate {
        if event.kind != ChangeKind::Insert {
            debug!(kind = ?event.kind, "Ignoring change");
            return ShellUpdate::ChangeIgnored(event.kind);
        }
        let message = match Message::from_row(event.new) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed insert");
                return ShellUpdate::MalformedRow;
            }
        };

        let id = message.id.clone();
        match self.state.append_message(message) {
            AppendResult::Appended => {
                debug!(%id, "Message appended");
                ShellUpdate::MessageAppended(id)
            }
            AppendResult::Duplicate => {
                debug!(%id, "Duplicate insert skipped");
                ShellUpdate::DuplicateSkipped(id)
            }
        }
    }

    fn apply_auth(&mut self, change: AuthChange) -> ShellUpdate {
        info!(
            event = ?change.event,
            user = change.session.as_ref().map(|s| s.email()).unwrap_or("-"),
            "Session changed"
        );
        self.state.replace_session(change.session);
        ShellUpdate::SessionReplaced(change.event)
    }
}

async fn recv_or_pending<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
