//! Domain model and handler traits for the chat bridge.
//!
//! Nothing here talks to a network or a database; it defines the
//! vocabulary ([`model::Forwardable`] and friends) and the two
//! abstract roles ([`handler::ChatHandler`],
//! [`handler::ChatHandlerFactory`]) that the TG and XP sides implement.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod handler;
pub mod model;
pub mod text;

pub use handler::{ChatHandler, ChatHandlerFactory};
pub use model::{
    Attachment, Chat, ChatAddress, Event, Forwardable, Message, Sender, Sticker, StaticUrl,
    UrlCallback, UrlCallbackError,
};
