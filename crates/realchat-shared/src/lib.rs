//! Domain types shared by the backend client and the chat front-end.

pub mod constants;
pub mod error;
pub mod time;
pub mod types;

pub use error::SharedError;
pub use types::{Credentials, Message, MessageId, NewMessage, Session, User, UserId};
