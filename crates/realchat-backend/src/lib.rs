//! Client for the managed chat backend: row queries, inserts, change feeds
//! and the auth session, behind the [`ChatBackend`] trait.

pub mod backend;
pub mod error;
pub mod hosted;
pub mod memory;
pub mod subscription;

pub use backend::{
    AuthChange, AuthEvent, ChangeEvent, ChangeFilter, ChangeKind, ChatBackend, SelectQuery,
    SignUpOutcome,
};
pub use error::{AuthError, AuthErrorKind, BackendError, Result};
pub use hosted::{HostedBackend, HostedConfig};
pub use memory::{CallStats, InMemoryBackend, Operation};
pub use subscription::{
    AuthSubscription, ChangeSubscription, ListenerRegistry, Subscription, SubscriptionHandle,
};
