//! Immutable value types shared by both networks.
//!
//! These mirror the five-variant `Forwardable` sum: a routing address
//! plus event/message/attachment/sticker/unbridge payloads that travel
//! from one network's inbound handling into the other network's
//! outbound [`ChatHandler`](crate::handler::ChatHandler).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// A routing address for one side of a pairing: a TG chat id or an XP
/// room JID, both represented as their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatAddress(String);

impl ChatAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ChatAddress {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ChatAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChatAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A routing address with an optional thread/topic selector inside it
/// (forum topics on TG have no equivalent concept on XP).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chat {
    pub address: ChatAddress,
    pub topic_id: Option<i64>,
}

impl Chat {
    pub fn new(address: impl Into<ChatAddress>) -> Self {
        Self {
            address: address.into(),
            topic_id: None,
        }
    }

    pub fn with_topic(address: impl Into<ChatAddress>, topic_id: i64) -> Self {
        Self {
            address: address.into(),
            topic_id: Some(topic_id),
        }
    }
}

/// The author of a forwarded message. `id` is stable across edits and
/// is what the XP side uses to pick an impersonation actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sender {
    pub name: String,
    pub id: String,
}

impl Sender {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// A system notice with no associated identity; never recorded in
/// [`chatbridge_storage`](../../chatbridge_storage/index.html)'s message table.
#[derive(Debug, Clone)]
pub struct Event {
    pub chat: Chat,
    pub content: String,
}

/// A forwarded chat message. `reply` carries the *text* of the quoted
/// message, not its id, because XP quotes arrive as inline prefixed
/// lines rather than a structured reference.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub chat: Chat,
    pub sender: Sender,
    pub content: String,
    pub reply: Option<String>,
    pub edit: bool,
}

/// Errors surfaced by a [`UrlCallback`] while lazily resolving an
/// attachment's download URL.
#[derive(Debug, thiserror::Error)]
pub enum UrlCallbackError {
    #[error("failed to resolve attachment url: {0}")]
    Resolve(String),
}

/// A lazy producer of a download URL. TG requires a second API call to
/// turn a `file_id` into a CDN path; XP out-of-band URLs are already
/// resolved and the callback simply echoes them back.
#[async_trait]
pub trait UrlCallback: Send + Sync {
    async fn url(&self) -> Result<String, UrlCallbackError>;
}

pub type BoxedUrlCallback = Arc<dyn UrlCallback>;

/// A callback that always resolves to a fixed, already-known URL (used
/// for XP out-of-band attachments, which need no lazy resolution).
pub struct StaticUrl(String);

impl StaticUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn boxed(url: impl Into<String>) -> BoxedUrlCallback {
        Arc::new(Self::new(url))
    }
}

#[async_trait]
impl UrlCallback for StaticUrl {
    async fn url(&self) -> Result<String, UrlCallbackError> {
        Ok(self.0.clone())
    }
}

/// A message plus a lazily-resolved binary payload.
#[derive(Clone)]
pub struct Attachment {
    pub message: Message,
    pub url_callback: BoxedUrlCallback,
    pub mime: Option<String>,
    pub fsize: Option<u64>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("message", &self.message)
            .field("mime", &self.mime)
            .field("fsize", &self.fsize)
            .finish_non_exhaustive()
    }
}

/// An attachment with a stable cross-session identity (TG's
/// `file_id`). The only attachment kind whose uploaded peer-network URL
/// is persisted, since re-uploading the same sticker is wasteful and
/// its content never changes.
#[derive(Clone)]
pub struct Sticker {
    pub attachment: Attachment,
    pub file_id: String,
}

impl fmt::Debug for Sticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sticker")
            .field("attachment", &self.attachment)
            .field("file_id", &self.file_id)
            .finish()
    }
}

/// The sum type routed through the dispatcher queue.
#[derive(Debug, Clone)]
pub enum Forwardable {
    Event(Event),
    Message(Message),
    Attachment(Attachment),
    Sticker(Sticker),
    Unbridge(Chat),
}

impl Forwardable {
    /// The destination chat this forwardable is addressed to, used by
    /// the dispatcher to look up the registered handler.
    pub fn chat(&self) -> &Chat {
        match self {
            Forwardable::Event(event) => &event.chat,
            Forwardable::Message(message) => &message.chat,
            Forwardable::Attachment(attachment) => &attachment.message.chat,
            Forwardable::Sticker(sticker) => &sticker.attachment.message.chat,
            Forwardable::Unbridge(chat) => chat,
        }
    }
}
