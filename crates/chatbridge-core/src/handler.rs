//! The two abstract roles every network side plays: a [`ChatHandler`]
//! that receives forwardables and emits them on its network, and a
//! [`ChatHandlerFactory`] that builds one when a pairing is confirmed.

use async_trait::async_trait;

use crate::model::{Attachment, Event, Message, Sticker};

/// Receives forwardables addressed to one chat and emits them on this
/// handler's network. Implementations must never propagate an error:
/// every method swallows its own failures and logs them, matching the
/// bridge-wide policy that the dispatcher never sees a handler
/// exception.
#[async_trait]
pub trait ChatHandler: Send + Sync {
    async fn send_message(&self, message: &Message);

    async fn send_attachment(&self, attachment: &Attachment);

    /// Stickers reuse the attachment path by default; networks with a
    /// dedicated sticker upload contract (XP) override this.
    async fn send_sticker(&self, sticker: &Sticker) {
        self.send_attachment(&sticker.attachment).await;
    }

    async fn edit_message(&self, message: &Message);

    async fn send_event(&self, event: &Event);

    /// Terminates the pairing on this handler's network: post the
    /// canned unbridge notice and leave the chat/room.
    async fn unbridge(&self);
}

/// Creates a [`ChatHandler`] for a newly-confirmed pairing and
/// registers it with whatever owns the dispatcher's handler map. One
/// factory per network side; the chat service calls every registered
/// factory on bind and on startup replay.
#[async_trait]
pub trait ChatHandlerFactory: Send + Sync {
    async fn create_handler(&self, tg_chat_id: i64, xp_room: &str);
}
