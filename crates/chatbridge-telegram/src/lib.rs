//! TG-side API client, polling loop, outbound handler and handler
//! factory for the chat bridge.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod error;
pub mod factory;
pub mod handler;
pub mod messages;
pub mod model;
pub mod poll;

pub use api::{MediaKind, SentMessage, TelegramApi};
pub use error::{TelegramError, TelegramResult};
pub use factory::TelegramHandlerFactory;
pub use handler::TelegramChatHandler;
pub use poll::TelegramPoller;
