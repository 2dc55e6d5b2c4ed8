//! Builds the outbound TG handler for a confirmed pairing and
//! registers it with the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use chatbridge_core::{ChatAddress, ChatHandlerFactory};
use chatbridge_dispatcher::MessageDispatcher;
use chatbridge_storage::{MessageStore, TopicStore};
use tracing::info;

use crate::api::TelegramApi;
use crate::handler::TelegramChatHandler;

/// Bounded LRU capacity for each handler's reply/message-id cache.
const HANDLER_CACHE_CAPACITY: usize = 512;

pub struct TelegramHandlerFactory {
    api: TelegramApi,
    dispatcher: Arc<MessageDispatcher>,
    messages: MessageStore,
    topics: TopicStore,
}

impl TelegramHandlerFactory {
    pub fn new(
        api: TelegramApi,
        dispatcher: Arc<MessageDispatcher>,
        messages: MessageStore,
        topics: TopicStore,
    ) -> Self {
        Self {
            api,
            dispatcher,
            messages,
            topics,
        }
    }
}

#[async_trait]
impl ChatHandlerFactory for TelegramHandlerFactory {
    async fn create_handler(&self, tg_chat_id: i64, xp_room: &str) {
        let handler = Arc::new(TelegramChatHandler::new(
            tg_chat_id,
            xp_room,
            self.api.clone(),
            self.messages.clone(),
            self.topics.clone(),
            HANDLER_CACHE_CAPACITY,
        ));
        self.dispatcher
            .register(ChatAddress::from(tg_chat_id), handler);
        info!(tg_chat_id, xp_room, "registered telegram handler");
    }
}
