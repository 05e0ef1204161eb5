//! Process-local backend.
//!
//! Behaves like a freshly created hosted project with email auto-confirm:
//! rows get server-assigned ids and timestamps, inserts are echoed to change
//! subscribers, and unknown credentials are rejected as invalid. Used for
//! offline runs and as the backend in tests, which is why it also counts
//! calls and can be told to fail the next call of a given operation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use realchat_shared::{Credentials, Message, MessageId, NewMessage, Session, User, UserId};

use crate::backend::{
    AuthChange, AuthEvent, ChangeEvent, ChangeFilter, ChatBackend, SelectQuery, SignUpOutcome,
};
use crate::error::{AuthError, AuthErrorKind, BackendError, Result};
use crate::subscription::{
    AuthSubscription, ChangeSubscription, ListenerRegistry, Subscription, SubscriptionHandle,
};

/// Operations whose next call can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Subscribe,
    SignIn,
    SignUp,
    SignOut,
}

/// Call and release counters.
#[derive(Debug, Default)]
pub struct CallStats {
    pub selects: AtomicUsize,
    pub inserts: AtomicUsize,
    pub sign_ins: AtomicUsize,
    pub sign_ups: AtomicUsize,
    pub sign_outs: AtomicUsize,
    pub change_releases: AtomicUsize,
    pub auth_releases: AtomicUsize,
}

impl CallStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    schema: String,
    tables: HashMap<String, Vec<Message>>,
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    failures: HashSet<Operation>,
    require_confirmation: bool,
}

#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    changes: ListenerRegistry<ChangeEvent>,
    auth: ListenerRegistry<AuthChange>,
    stats: Arc<CallStats>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                schema: realchat_shared::constants::DEFAULT_SCHEMA.to_string(),
                ..Default::default()
            })),
            changes: ListenerRegistry::new(),
            auth: ListenerRegistry::new(),
            stats: Arc::new(CallStats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    /// Make the next call of `op` fail with [`BackendError::Unavailable`].
    pub fn fail_next(&self, op: Operation) {
        self.lock().failures.insert(op);
    }

    /// Sign-ups create unconfirmed accounts that cannot sign in yet.
    pub fn require_email_confirmation(&self, required: bool) {
        self.lock().require_confirmation = required;
    }

    /// Create an account without signing it in.
    pub fn seed_account(&self, email: &str, password: &str) -> User {
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
        };
        self.lock().accounts.insert(
            account_key(email),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    /// Store a row written by `author` without notifying subscribers, as if
    /// it predated every subscription.
    pub fn seed_message(&self, table: &str, author: &User, content: &str) -> Message {
        let mut state = self.lock();
        let message = next_message(&state, table, author.id, &author.email, content);
        state.tables.entry(table.to_string()).or_default().push(message.clone());
        message
    }

    /// Deliver a raw change event to subscribers.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.changes.notify(&event)
    }

    /// Drop the current session as the server would on revocation.
    pub fn invalidate_session(&self) {
        self.lock().session = None;
        self.notify_auth(AuthEvent::SignedOut, None);
    }

    /// Issue new tokens for the current session.
    pub fn refresh_session(&self) -> Option<Session> {
        let refreshed = {
            let mut state = self.lock();
            let session = state.session.as_mut()?;
            session.access_token = Uuid::new_v4().to_string();
            session.refresh_token = Uuid::new_v4().to_string();
            session.clone()
        };
        self.notify_auth(AuthEvent::TokenRefreshed, Some(refreshed.clone()));
        Some(refreshed)
    }

    pub fn active_change_listeners(&self) -> usize {
        self.changes.len()
    }

    pub fn active_auth_listeners(&self) -> usize {
        self.auth.len()
    }

    fn take_failure(&self, op: Operation) -> Result<()> {
        if self.lock().failures.remove(&op) {
            debug!(?op, "Injected failure");
            return Err(BackendError::Unavailable(format!("{op:?} failed")));
        }
        Ok(())
    }

    fn notify_auth(&self, event: AuthEvent, session: Option<Session>) {
        self.auth.notify(&AuthChange { event, session });
    }

    fn start_session(&self, user: User) -> Session {
        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Uuid::new_v4().to_string(),
            expires_at: None,
            user,
        };
        self.lock().session = Some(session.clone());
        self.notify_auth(AuthEvent::SignedIn, Some(session.clone()));
        session
    }
}

fn account_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Next row for `table`. Timestamps never run backwards within a table.
fn next_message(
    state: &MemoryState,
    table: &str,
    user_id: UserId,
    email: &str,
    content: &str,
) -> Message {
    let now = Utc::now();
    let created_at: DateTime<Utc> = state
        .tables
        .get(table)
        .and_then(|rows| rows.last())
        .map_or(now, |last| last.created_at.max(now));

    Message {
        id: MessageId(Uuid::new_v4().to_string()),
        content: content.to_string(),
        user_id,
        user_email: email.to_string(),
        created_at,
    }
}

#[async_trait]
impl ChatBackend for InMemoryBackend {
    async fn select_messages(&self, query: &SelectQuery) -> Result<Vec<Message>> {
        self.stats.selects.fetch_add(1, Ordering::SeqCst);
        self.take_failure(Operation::Select)?;

        if query.order_column != "created_at" && query.order_column != "id" {
            return Err(BackendError::Api {
                status: 400,
                message: format!("column {}.{} does not exist", query.table, query.order_column),
            });
        }

        let mut rows = self.lock().tables.get(&query.table).cloned().unwrap_or_default();
        if query.order_column == "id" {
            rows.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        } else {
            rows.sort_by_key(|m| m.created_at);
        }
        if !query.ascending {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn insert_message(&self, table: &str, row: &NewMessage) -> Result<()> {
        self.stats.inserts.fetch_add(1, Ordering::SeqCst);
        self.take_failure(Operation::Insert)?;

        let (schema, message) = {
            let mut state = self.lock();
            if state.session.is_none() {
                return Err(BackendError::NoSession);
            }
            let message = next_message(&state, table, row.user_id, &row.user_email, &row.content);
            state.tables.entry(table.to_string()).or_default().push(message.clone());
            (state.schema.clone(), message)
        };

        let delivered = self.changes.notify(&ChangeEvent::insert(&schema, table, &message)?);
        debug!(id = %message.id, subscribers = delivered, "Row inserted");
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        self.take_failure(Operation::Subscribe)?;

        let (id, rx) = self.changes.register_filtered(move |event| filter.matches(event));
        let release = self.changes.release_handle(id);
        let stats = self.stats.clone();
        let handle = SubscriptionHandle::new(move || {
            drop(release);
            stats.change_releases.fetch_add(1, Ordering::SeqCst);
        });
        Ok(Subscription::new(rx, handle))
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Session> {
        self.stats.sign_ins.fetch_add(1, Ordering::SeqCst);
        self.take_failure(Operation::SignIn)?;

        let user = {
            let state = self.lock();
            match state.accounts.get(&account_key(&credentials.email)) {
                Some(account) if account.password == credentials.password => {
                    account.user.clone()
                }
                _ => {
                    return Err(AuthError {
                        kind: AuthErrorKind::InvalidCredentials,
                        status: Some(400),
                        message: "Invalid login credentials".into(),
                    }
                    .into())
                }
            }
        };
        Ok(self.start_session(user))
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome> {
        self.stats.sign_ups.fetch_add(1, Ordering::SeqCst);
        self.take_failure(Operation::SignUp)?;

        let key = account_key(&credentials.email);
        let (user, confirm) = {
            let mut state = self.lock();
            if state.accounts.contains_key(&key) {
                return Err(AuthError {
                    kind: AuthErrorKind::UserAlreadyExists,
                    status: Some(422),
                    message: "User already registered".into(),
                }
                .into());
            }
            if credentials.password.len() < 6 {
                return Err(AuthError {
                    kind: AuthErrorKind::WeakPassword,
                    status: Some(422),
                    message: "Password should be at least 6 characters.".into(),
                }
                .into());
            }
            let user = User {
                id: UserId::new(),
                email: credentials.email.trim().to_string(),
            };
            // Unconfirmed accounts are kept out of the sign-in table.
            if !state.require_confirmation {
                state.accounts.insert(
                    key,
                    Account {
                        user: user.clone(),
                        password: credentials.password.clone(),
                    },
                );
            }
            (user, state.require_confirmation)
        };

        if confirm {
            return Ok(SignUpOutcome::ConfirmationRequired { user });
        }
        Ok(SignUpOutcome::SignedIn(self.start_session(user)))
    }

    async fn sign_out(&self) -> Result<()> {
        self.stats.sign_outs.fetch_add(1, Ordering::SeqCst);
        // The local session ends even when the request fails.
        let result = self.take_failure(Operation::SignOut);

        self.lock().session = None;
        self.notify_auth(AuthEvent::SignedOut, None);
        result
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let initial = AuthChange {
            event: AuthEvent::InitialSession,
            session: self.current_session(),
        };
        let (id, rx) = self.auth.register(Some(initial));
        let release = self.auth.release_handle(id);
        let stats = self.stats.clone();
        let handle = SubscriptionHandle::new(move || {
            drop(release);
            stats.auth_releases.fetch_add(1, Ordering::SeqCst);
        });
        Subscription::new(rx, handle)
    }

    fn current_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }
}
