//! XP-side actor pool, session lifecycle, listener, outbound handler
//! and handler factory for the chat bridge.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod actor;
pub mod error;
pub mod factory;
pub mod handler;
pub mod listener;
pub mod messages;
pub mod session;
pub mod text;
pub mod upload;

pub use actor::{Actor, XmppActorFactory};
pub use error::{XmppError, XmppResult};
pub use factory::XmppHandlerFactory;
pub use handler::XmppChatHandler;
pub use listener::XmppListener;
