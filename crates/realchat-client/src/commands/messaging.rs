use tracing::{info, warn};

use realchat_backend::BackendError;
use realchat_shared::NewMessage;

use crate::shell::ChatShell;

/// Why a send issued no request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyDraft,
    NoSession,
}

#[derive(Debug)]
pub enum SendOutcome {
    /// The row was inserted and the draft cleared.
    Sent,
    Skipped(SkipReason),
    /// The insert failed; the draft is unchanged.
    Failed(BackendError),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

impl ChatShell {
    /// Insert the trimmed draft as the signed-in user.
    pub async fn send_message(&mut self) -> SendOutcome {
        let Some(session) = self.state.session() else {
            return SendOutcome::Skipped(SkipReason::NoSession);
        };
        let Some(row) = NewMessage::compose(self.state.draft(), session) else {
            return SendOutcome::Skipped(SkipReason::EmptyDraft);
        };

        match self.backend.insert_message(&self.config.table, &row).await {
            Ok(()) => {
                info!(table = %self.config.table, len = row.content.len(), "Message sent");
                self.state.clear_draft();
                SendOutcome::Sent
            }
            Err(e) => {
                warn!(table = %self.config.table, error = %e, "Failed to send message");
                SendOutcome::Failed(e)
            }
        }
    }
}
