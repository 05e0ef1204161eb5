//! Shell state and its transitions.
//!
//! [`ShellState`] is owned by the [`crate::shell::ChatShell`] and only
//! changes through the methods below. Every change to the message list
//! queues a [`ScrollRequest`] for the front-end to take.

use std::collections::HashSet;

use realchat_shared::{Credentials, Message, MessageId, Session, UserId};

/// What to do with a live insert whose id is already displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    SkipKnownIds,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
}

/// Bring `target` (the newest message) into view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollRequest {
    /// `None` when the list is empty.
    pub target: Option<MessageId>,
    pub behavior: ScrollBehavior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    Appended,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct ShellState {
    messages: Vec<Message>,
    known_ids: HashSet<MessageId>,
    draft: String,
    email: String,
    password: String,
    session: Option<Session>,
    scroll: Option<ScrollRequest>,
    duplicates: DuplicatePolicy,
}

impl ShellState {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self {
            duplicates,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.session.as_ref().map(Session::user_id)
    }

    pub fn phase(&self) -> SessionPhase {
        match self.session {
            Some(_) => SessionPhase::Authenticated,
            None => SessionPhase::Unauthenticated,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.email.clone(), self.password.clone())
    }

    /// Replace the whole list, e.g. with the result of the initial fetch.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.known_ids = messages.iter().map(|m| m.id.clone()).collect();
        self.messages = messages;
        self.request_scroll();
    }

    /// Append a live insert at the end of the list.
    pub fn append_message(&mut self, message: Message) -> AppendResult {
        let fresh = self.known_ids.insert(message.id.clone());
        if !fresh && self.duplicates == DuplicatePolicy::SkipKnownIds {
            return AppendResult::Duplicate;
        }
        self.messages.push(message);
        self.request_scroll();
        AppendResult::Appended
    }

    pub fn replace_session(&mut self, session: Option<Session>) {
        self.session = session;
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn clear_credentials(&mut self) {
        self.email.clear();
        self.password.clear();
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    /// Take the pending scroll request, if any.
    pub fn take_scroll(&mut self) -> Option<ScrollRequest> {
        self.scroll.take()
    }

    fn request_scroll(&mut self) {
        self.scroll = Some(ScrollRequest {
            target: self.messages.last().map(|m| m.id.clone()),
            behavior: ScrollBehavior::Smooth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use realchat_shared::User;

    fn message(id: &str, minutes_ago: i64) -> Message {
        Message {
            id: MessageId::from(id),
            content: format!("message {id}"),
            user_id: UserId::new(),
            user_email: "ada@example.com".into(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn ids(state: &ShellState) -> Vec<&str> {
        state.messages().iter().map(|m| m.id.0.as_str()).collect()
    }

    #[test]
    fn test_append_after_replace() {
        let mut state = ShellState::default();
        state.replace_messages(vec![message("a", 3), message("b", 2)]);
        assert_eq!(state.append_message(message("c", 1)), AppendResult::Appended);
        assert_eq!(ids(&state), ["a", "b", "c"]);
    }

    #[test]
    fn test_skip_known_ids() {
        let mut state = ShellState::new(DuplicatePolicy::SkipKnownIds);
        state.replace_messages(vec![message("a", 2)]);
        state.take_scroll();

        assert_eq!(state.append_message(message("a", 2)), AppendResult::Duplicate);
        assert_eq!(ids(&state), ["a"]);
        assert_eq!(state.take_scroll(), None);
    }

    #[test]
    fn test_append_policy_keeps_duplicates() {
        let mut state = ShellState::new(DuplicatePolicy::Append);
        state.replace_messages(vec![message("a", 2)]);
        assert_eq!(state.append_message(message("a", 2)), AppendResult::Appended);
        assert_eq!(ids(&state), ["a", "a"]);
    }

    #[test]
    fn test_scroll_targets_newest() {
        let mut state = ShellState::default();
        assert_eq!(state.take_scroll(), None);

        state.replace_messages(Vec::new());
        assert_eq!(
            state.take_scroll(),
            Some(ScrollRequest {
                target: None,
                behavior: ScrollBehavior::Smooth
            })
        );

        state.append_message(message("x", 0));
        let scroll = state.take_scroll().unwrap();
        assert_eq!(scroll.target, Some(MessageId::from("x")));
        assert_eq!(scroll.behavior, ScrollBehavior::Smooth);
    }

    #[test]
    fn test_session_phase() {
        let mut state = ShellState::default();
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);

        let user = User {
            id: UserId::new(),
            email: "ada@example.com".into(),
        };
        state.replace_session(Some(Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: None,
            user: user.clone(),
        }));
        assert_eq!(state.phase(), SessionPhase::Authenticated);
        assert_eq!(state.current_user(), Some(user.id));

        state.replace_session(None);
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
    }

    #[test]
    fn test_clear_inputs() {
        let mut state = ShellState::default();
        state.set_email("ada@example.com");
        state.set_password("pw");
        state.set_draft("hello");

        state.clear_credentials();
        assert_eq!(state.credentials(), Credentials::default());
        assert_eq!(state.draft(), "hello");

        state.clear_draft();
        assert_eq!(state.draft(), "");
    }
}
