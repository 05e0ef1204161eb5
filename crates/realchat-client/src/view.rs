//! The view model: what the front-end draws, as a pure function of the
//! shell state and the clock.

use chrono::{DateTime, Utc};

use realchat_shared::constants::APP_NAME;

use crate::render::{bubble, Bubble, BubbleProps};
use crate::state::ShellState;

pub const AUTH_HEADING: &str = "Sign In or Sign Up";
pub const AUTH_SUBMIT_LABEL: &str = "Continue";
pub const COMPOSER_PLACEHOLDER: &str = "Type your message...";
pub const SEND_LABEL: &str = "Send";
pub const SIGN_OUT_LABEL: &str = "Sign Out";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: &'static str,
    /// Email of the signed-in user, shown next to the sign-out control.
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthForm {
    pub header: Header,
    pub heading: &'static str,
    pub email: String,
    /// One `*` per password character.
    pub password_mask: String,
    pub submit_label: &'static str,
    /// Both fields are required.
    pub submit_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composer {
    pub draft: String,
    pub placeholder: &'static str,
    pub send_label: &'static str,
    pub send_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    pub header: Header,
    pub bubbles: Vec<Bubble>,
    pub composer: Composer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Auth(AuthForm),
    Chat(ChatView),
}

impl View {
    pub fn build(state: &ShellState, now: DateTime<Utc>) -> Self {
        let Some(session) = state.session() else {
            return View::Auth(AuthForm {
                header: Header {
                    title: APP_NAME,
                    user_email: None,
                },
                heading: AUTH_HEADING,
                email: state.email().to_string(),
                password_mask: "*".repeat(state.password().chars().count()),
                submit_label: AUTH_SUBMIT_LABEL,
                submit_enabled: state.credentials().is_complete(),
            });
        };

        let me = session.user_id();
        let bubbles = state
            .messages()
            .iter()
            .map(|m| {
                let props = BubbleProps {
                    content: &m.content,
                    author: &m.user_email,
                    created_at: m.created_at,
                    is_current_user: m.is_authored_by(&me),
                };
                bubble(&props, now)
            })
            .collect();

        View::Chat(ChatView {
            header: Header {
                title: APP_NAME,
                user_email: Some(session.email().to_string()),
            },
            bubbles,
            composer: Composer {
                draft: state.draft().to_string(),
                placeholder: COMPOSER_PLACEHOLDER,
                send_label: SEND_LABEL,
                send_enabled: !state.draft().trim().is_empty(),
            },
        })
    }

    pub fn header(&self) -> &Header {
        match self {
            View::Auth(form) => &form.header,
            View::Chat(chat) => &chat.header,
        }
    }
}
