use tracing::{info, warn};

use realchat_backend::{BackendError, SignUpOutcome};
use realchat_shared::User;

use crate::shell::ChatShell;

#[derive(Debug)]
pub enum AuthOutcome {
    /// Signed in to an existing account.
    SignedIn,
    /// No account matched, so one was created and signed in.
    SignedUp,
    /// No account matched and one was created, pending email confirmation.
    ConfirmationRequired(User),
    /// Email or password missing; nothing was sent.
    Incomplete,
    Failed(BackendError),
}

#[derive(Debug)]
pub enum SignOutOutcome {
    /// The request was accepted. The session clears once the listener
    /// reports it.
    Requested,
    Failed(BackendError),
}

impl ChatShell {
    /// Sign in with the entered credentials, registering them as a new
    /// account when they match none.
    ///
    /// The session itself arrives through the session listener. Credential
    /// fields are cleared after every attempt.
    pub async fn authenticate(&mut self) -> AuthOutcome {
        let credentials = self.state.credentials();
        if !credentials.is_complete() {
            return AuthOutcome::Incomplete;
        }

        let outcome = match self.backend.sign_in_with_password(&credentials).await {
            Ok(session) => {
                info!(user = %session.user_id(), "Signed in");
                AuthOutcome::SignedIn
            }
            Err(e) if e.is_invalid_credentials() => {
                info!(email = %credentials.email, "No matching account, signing up");
                match self.backend.sign_up(&credentials).await {
                    Ok(SignUpOutcome::SignedIn(session)) => {
                        info!(user = %session.user_id(), "Signed up");
                        AuthOutcome::SignedUp
                    }
                    Ok(SignUpOutcome::ConfirmationRequired { user }) => {
                        info!(user = %user.id, "Signed up, awaiting email confirmation");
                        AuthOutcome::ConfirmationRequired(user)
                    }
                    Err(e) => {
                        warn!(error = %e, "Sign-up failed");
                        AuthOutcome::Failed(e)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                AuthOutcome::Failed(e)
            }
        };

        self.state.clear_credentials();
        outcome
    }

    pub async fn sign_out(&mut self) -> SignOutOutcome {
        match self.backend.sign_out().await {
            Ok(()) => {
                info!("Sign-out requested");
                SignOutOutcome::Requested
            }
            Err(e) => {
                warn!(error = %e, "Sign-out failed");
                SignOutOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use realchat_backend::{AuthErrorKind, AuthEvent, CallStats, InMemoryBackend, Operation};

    use super::*;
    use crate::events::ShellUpdate;
    use crate::shell::ShellConfig;

    async fn mounted(backend: &InMemoryBackend) -> ChatShell {
        ChatShell::mount(Arc::new(backend.clone()), ShellConfig::default()).await
    }

    fn enter(shell: &mut ChatShell, email: &str, password: &str) {
        shell.state_mut().set_email(email);
        shell.state_mut().set_password(password);
    }

    #[tokio::test]
    async fn test_existing_account_signs_in_without_sign_up() {
        let backend = InMemoryBackend::new();
        backend.seed_account("ada@example.com", "secret-pw");
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "ada@example.com", "secret-pw");

        assert!(matches!(shell.authenticate().await, AuthOutcome::SignedIn));
        assert_eq!(shell.state().email(), "");
        assert_eq!(shell.state().password(), "");
        assert!(shell.state().session().is_none());

        shell.drain_pending();
        assert_eq!(shell.state().session().map(|s| s.email()), Some("ada@example.com"));
        assert_eq!(CallStats::get(&backend.stats().sign_ins), 1);
        assert_eq!(CallStats::get(&backend.stats().sign_ups), 0);
    }

    #[tokio::test]
    async fn test_unknown_email_signs_up_once() {
        let backend = InMemoryBackend::new();
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "new@example.com", "secret-pw");

        assert!(matches!(shell.authenticate().await, AuthOutcome::SignedUp));
        assert_eq!(CallStats::get(&backend.stats().sign_ins), 1);
        assert_eq!(CallStats::get(&backend.stats().sign_ups), 1);

        assert_eq!(
            shell.next_update().await,
            Some(ShellUpdate::SessionReplaced(AuthEvent::SignedIn))
        );
        assert_eq!(shell.state().session().map(|s| s.email()), Some("new@example.com"));
    }

    #[tokio::test]
    async fn test_wrong_password_attempts_one_sign_up() {
        let backend = InMemoryBackend::new();
        backend.seed_account("ada@example.com", "secret-pw");
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "ada@example.com", "wrong-pw");

        match shell.authenticate().await {
            AuthOutcome::Failed(BackendError::Auth(e)) => {
                assert_eq!(e.kind, AuthErrorKind::UserAlreadyExists)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(CallStats::get(&backend.stats().sign_ups), 1);
        assert_eq!(shell.state().credentials().email, "");
        shell.drain_pending();
        assert!(shell.state().session().is_none());
    }

    #[tokio::test]
    async fn test_other_sign_in_failures_do_not_sign_up() {
        let backend = InMemoryBackend::new();
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "ada@example.com", "secret-pw");
        backend.fail_next(Operation::SignIn);

        assert!(matches!(shell.authenticate().await, AuthOutcome::Failed(_)));
        assert_eq!(CallStats::get(&backend.stats().sign_ups), 0);
        assert_eq!(shell.state().email(), "");
        assert_eq!(shell.state().password(), "");
    }

    #[tokio::test]
    async fn test_confirmation_required() {
        let backend = InMemoryBackend::new();
        backend.require_email_confirmation(true);
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "new@example.com", "secret-pw");

        match shell.authenticate().await {
            AuthOutcome::ConfirmationRequired(user) => assert_eq!(user.email, "new@example.com"),
            other => panic!("unexpected outcome {other:?}"),
        }
        shell.drain_pending();
        assert!(shell.state().session().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_credentials_send_nothing() {
        let backend = InMemoryBackend::new();
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "ada@example.com", "");

        assert!(matches!(shell.authenticate().await, AuthOutcome::Incomplete));
        assert_eq!(CallStats::get(&backend.stats().sign_ins), 0);
        assert_eq!(shell.state().email(), "ada@example.com");
    }

    #[tokio::test]
    async fn test_sign_out_waits_for_listener() {
        let backend = InMemoryBackend::new();
        backend.seed_account("ada@example.com", "secret-pw");
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "ada@example.com", "secret-pw");
        shell.authenticate().await;
        shell.drain_pending();
        assert!(shell.state().session().is_some());

        assert!(matches!(shell.sign_out().await, SignOutOutcome::Requested));
        assert!(shell.state().session().is_some());

        assert_eq!(
            shell.next_update().await,
            Some(ShellUpdate::SessionReplaced(AuthEvent::SignedOut))
        );
        assert!(shell.state().session().is_none());
    }

    #[tokio::test]
    async fn test_failed_sign_out_still_ends_session() {
        let backend = InMemoryBackend::new();
        backend.seed_account("ada@example.com", "secret-pw");
        let mut shell = mounted(&backend).await;
        enter(&mut shell, "ada@example.com", "secret-pw");
        shell.authenticate().await;
        shell.drain_pending();

        backend.fail_next(Operation::SignOut);
        assert!(matches!(shell.sign_out().await, SignOutOutcome::Failed(_)));
        assert!(shell.state().session().is_some());

        assert_eq!(
            shell.drain_pending(),
            vec![ShellUpdate::SessionReplaced(AuthEvent::SignedOut)]
        );
        assert!(shell.state().session().is_none());
    }
}
