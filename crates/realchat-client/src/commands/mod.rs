//! User actions on the shell: sending a message, authenticating and
//! signing out.
//!
//! Each action returns a typed outcome. Failures are logged here and never
//! retried; whether to show them is up to the front-end.

pub mod auth;
pub mod messaging;

pub use auth::{AuthOutcome, SignOutOutcome};
pub use messaging::{SendOutcome, SkipReason};
