//! Builds the outbound XP handler for a confirmed pairing and
//! registers it with the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use chatbridge_core::{ChatAddress, ChatHandlerFactory};
use chatbridge_dispatcher::MessageDispatcher;
use chatbridge_storage::{MessageStore, StickerStore};
use tracing::{error, info, warn};

use crate::actor::XmppActorFactory;
use crate::handler::XmppChatHandler;

pub struct XmppHandlerFactory {
    actors: Arc<XmppActorFactory>,
    dispatcher: Arc<MessageDispatcher>,
    messages: MessageStore,
    stickers: StickerStore,
}

impl XmppHandlerFactory {
    pub fn new(
        actors: Arc<XmppActorFactory>,
        dispatcher: Arc<MessageDispatcher>,
        messages: MessageStore,
        stickers: StickerStore,
    ) -> Self {
        Self {
            actors,
            dispatcher,
            messages,
            stickers,
        }
    }
}

#[async_trait]
impl ChatHandlerFactory for XmppHandlerFactory {
    async fn create_handler(&self, tg_chat_id: i64, xp_room: &str) {
        let muc = match xp_room.parse() {
            Ok(muc) => muc,
            Err(error) => {
                error!(%error, xp_room, "refusing to register handler for invalid muc jid");
                return;
            }
        };

        if let Err(error) = self.actors.join_listener(&muc).await {
            warn!(%error, xp_room, "failed to join xmpp room as listener");
        }

        let handler = Arc::new(XmppChatHandler::new(
            tg_chat_id,
            muc,
            self.actors.clone(),
            self.messages.clone(),
            self.stickers.clone(),
        ));
        self.dispatcher
            .register(ChatAddress::from(xp_room), handler);
        info!(tg_chat_id, xp_room, "registered xmpp handler");
    }
}
