//! Notifications the shell applied to its state.
//!
//! Returned by [`crate::shell::ChatShell::next_update`] and
//! [`crate::shell::ChatShell::drain_pending`] so a front-end knows what to
//! redraw.

use realchat_backend::{AuthEvent, ChangeKind};
use realchat_shared::MessageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellUpdate {
    /// A live insert was appended to the list.
    MessageAppended(MessageId),
    /// A live insert repeated an id already displayed and was dropped.
    DuplicateSkipped(MessageId),
    /// A change other than an insert; the list is left alone.
    ChangeIgnored(ChangeKind),
    /// An insert whose row could not be decoded.
    MalformedRow,
    /// The session was replaced following this auth event.
    SessionReplaced(AuthEvent),
    /// The change feed ended; no more live inserts will arrive.
    ChangeFeedClosed,
    /// The session listener ended.
    AuthFeedClosed,
}

impl ShellUpdate {
    /// Whether the visible view may have changed.
    pub fn needs_redraw(&self) -> bool {
        matches!(
            self,
            ShellUpdate::MessageAppended(_) | ShellUpdate::SessionReplaced(_)
        )
    }
}
