//! Outbound TG handler: translates forwardables destined for a TG
//! chat into `teloxide` calls.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatbridge_cache::Cache;
use chatbridge_core::{Attachment, ChatHandler, Event, Message};
use chatbridge_storage::{MessageStore, TopicStore};
use teloxide::types::{ChatId, MessageEntity};
use tokio::sync::Mutex;
use tracing::error;

use crate::api::{MediaKind, TelegramApi};
use crate::messages;

/// Window after which a per-sender topic-residence entry decays and
/// subsequent non-reply messages go back to the main chat.
const TOPIC_TIMEOUT: Duration = Duration::from_secs(10);

struct TopicTimeoutEntry {
    topic_id: i64,
    time: Instant,
}

/// Translates forwardables bound for one TG chat into API calls.
/// `muc` is the peer XP room this chat is paired with — needed to
/// scope every `MessageStore` lookup to this specific pairing.
pub struct TelegramChatHandler {
    chat_id: i64,
    muc: String,
    api: TelegramApi,
    storage: MessageStore,
    #[allow(dead_code)]
    topics: TopicStore,
    cache: Mutex<Cache>,
    residence: Mutex<HashMap<String, TopicTimeoutEntry>>,
    topic_ids_cache: Mutex<HashMap<i64, i64>>,
}

impl TelegramChatHandler {
    pub fn new(
        chat_id: i64,
        muc: impl Into<String>,
        api: TelegramApi,
        storage: MessageStore,
        topics: TopicStore,
        cache_capacity: usize,
    ) -> Self {
        Self {
            chat_id,
            muc: muc.into(),
            api,
            storage,
            topics,
            cache: Mutex::new(Cache::new(cache_capacity)),
            residence: Mutex::new(HashMap::new()),
            topic_ids_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Records which forum topic a sent message landed in, so a later
    /// reply targeting it can be routed to the same topic even if the
    /// residence window has since expired.
    pub async fn remember_topic(&self, telegram_message_id: i64, topic_id: i64) {
        self.topic_ids_cache
            .lock()
            .await
            .insert(telegram_message_id, topic_id);
    }

    async fn residence_topic_if_fresh(&self, sender_id: &str) -> Option<i64> {
        let mut residence = self.residence.lock().await;
        let entry = residence.get_mut(sender_id)?;
        if entry.time.elapsed() < TOPIC_TIMEOUT {
            entry.time = Instant::now();
            Some(entry.topic_id)
        } else {
            None
        }
    }

    async fn refresh_residence(&self, sender_id: &str, topic_id: i64) {
        self.residence.lock().await.insert(
            sender_id.to_string(),
            TopicTimeoutEntry {
                topic_id,
                time: Instant::now(),
            },
        );
    }

    /// Resolves `reply` to a concrete TG message id: the bounded LRU
    /// cache first (recently posted reply targets), the durable store
    /// second.
    async fn resolve_reply(&self, reply: &str) -> Option<i64> {
        if let Some(cached) = self.cache.lock().await.reply_map().get(&reply.to_string()) {
            if let Ok(id) = cached.parse() {
                return Some(id);
            }
        }

        match self
            .storage
            .get_by_body(self.chat_id, None, &self.muc, reply)
            .await
        {
            Ok(Some(entry)) => Some(entry.telegram_id),
            Ok(None) => None,
            Err(error) => {
                error!(%error, "failed to resolve reply target");
                None
            }
        }
    }

    /// Resolves an origin event id to its previously recorded TG
    /// message id, for edits: cache first, durable store second.
    async fn resolve_origin(&self, origin_id: &str) -> Option<i64> {
        if let Some(cached) = self
            .cache
            .lock()
            .await
            .message_ids()
            .get(&origin_id.to_string())
        {
            if let Ok(id) = cached.parse() {
                return Some(id);
            }
        }

        match self
            .storage
            .get_by_id(self.chat_id, None, &self.muc, origin_id)
            .await
        {
            Ok(Some(entry)) => Some(entry.telegram_id),
            Ok(None) => None,
            Err(error) => {
                error!(%error, "failed to resolve origin id for edit");
                None
            }
        }
    }

    /// Shared text-building logic for `send_message`/`edit_message`:
    /// native reply when the quoted body resolves to a TG id,
    /// otherwise an inline blockquote.
    async fn build_text(&self, message: &Message) -> (String, Vec<MessageEntity>, Option<i64>, Option<i64>) {
        let prefix_entity = TelegramApi::bold_sender_entity(&message.sender.name);

        let Some(reply) = &message.reply else {
            let thread_id = self.residence_topic_if_fresh(&message.sender.id).await;
            return (
                format!("{}: {}", message.sender.name, message.content),
                vec![prefix_entity],
                None,
                thread_id,
            );
        };

        match self.resolve_reply(reply).await {
            Some(telegram_id) => {
                let thread_id = {
                    let mut cache = self.topic_ids_cache.lock().await;
                    cache.get(&telegram_id).copied()
                };

                if let Some(thread_id) = thread_id {
                    self.refresh_residence(&message.sender.id, thread_id).await;
                } else if let Some(thread_id) = self.residence_topic_if_fresh(&message.sender.id).await {
                    return (
                        format!("{}: {}", message.sender.name, message.content),
                        vec![prefix_entity],
                        Some(telegram_id),
                        Some(thread_id),
                    );
                }

                (
                    format!("{}: {}", message.sender.name, message.content),
                    vec![prefix_entity],
                    Some(telegram_id),
                    thread_id,
                )
            }
            None => {
                let text = format!("{reply}\n{}: {}", message.sender.name, message.content);
                let reply_len = reply.encode_utf16().count();
                let sender_len = message.sender.name.encode_utf16().count();
                let entities = vec![
                    MessageEntity::blockquote(0, reply_len),
                    MessageEntity::bold(reply_len + 1, sender_len),
                ];
                (text, entities, None, None)
            }
        }
    }
}

#[async_trait]
impl ChatHandler for TelegramChatHandler {
    async fn send_message(&self, message: &Message) {
        let (text, entities, reply_to, thread_id) = self.build_text(message).await;

        match self
            .api
            .send_text(ChatId(self.chat_id), text, entities, reply_to, thread_id)
            .await
        {
            Ok(sent) => {
                let mut cache = self.cache.lock().await;
                cache
                    .reply_map()
                    .add(message.content.clone(), sent.message_id.to_string());
                cache
                    .message_ids()
                    .add(message.id.clone(), sent.message_id.to_string());
                drop(cache);

                if let Some(thread_id) = sent.message_thread_id {
                    self.remember_topic(sent.message_id, thread_id).await;
                }

                if let Err(error) = self
                    .storage
                    .add(
                        self.chat_id,
                        message.chat.topic_id,
                        &message.content,
                        sent.message_id,
                        &self.muc,
                        &message.id,
                    )
                    .await
                {
                    error!(%error, "failed to persist message identity");
                }
            }
            Err(error) => error!(%error, "error sending a message"),
        }
    }

    async fn send_attachment(&self, attachment: &Attachment) {
        let url = match attachment.url_callback.url().await {
            Ok(url) => url,
            Err(error) => {
                error!(%error, "failed to resolve attachment url");
                return;
            }
        };

        let bytes = match reqwest::get(&url).await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(error) => {
                    error!(%error, url, "failed to read attachment body");
                    return;
                }
            },
            Ok(response) => {
                error!(status = %response.status(), url, "error while getting file");
                return;
            }
            Err(error) => {
                error!(%error, url, "failed to fetch attachment");
                return;
            }
        };

        let thread_id = self
            .residence_topic_if_fresh(&attachment.message.sender.id)
            .await;
        let kind = MediaKind::from_mime(attachment.mime.as_deref());
        let caption = format!("{}: ", attachment.message.sender.name);
        let caption_entities = vec![TelegramApi::bold_sender_entity(
            &attachment.message.sender.name,
        )];

        let result = self
            .api
            .send_media(
                ChatId(self.chat_id),
                kind,
                bytes,
                attachment.message.content.clone(),
                caption,
                caption_entities,
                thread_id,
            )
            .await;

        match result {
            Ok(sent) => {
                self.cache
                    .lock()
                    .await
                    .reply_map()
                    .add(attachment.message.content.clone(), sent.message_id.to_string());
                if let Some(thread_id) = sent.message_thread_id {
                    self.remember_topic(sent.message_id, thread_id).await;
                }

                if let Err(error) = self
                    .storage
                    .add(
                        self.chat_id,
                        attachment.message.chat.topic_id,
                        &attachment.message.content,
                        sent.message_id,
                        &self.muc,
                        &attachment.message.id,
                    )
                    .await
                {
                    error!(%error, "failed to persist attachment identity");
                }
            }
            Err(error) => {
                error!(%error, "failed to send file to telegram");
                let fallback = messages::transfer_failure(
                    &attachment.message.content,
                    &attachment.message.sender.name,
                );
                if let Err(error) = self
                    .api
                    .send_text(ChatId(self.chat_id), fallback, vec![], None, None)
                    .await
                {
                    error!(%error, "failed to send fallback transfer-failure message");
                }
            }
        }
    }

    async fn edit_message(&self, message: &Message) {
        let Some(telegram_id) = self.resolve_origin(&message.id).await else {
            tracing::info!(event_id = %message.id, "no telegram id found for edited message");
            return;
        };

        let (text, entities, _reply_to, _thread_id) = self.build_text(message).await;

        match self
            .api
            .edit_text(ChatId(self.chat_id), telegram_id, text, entities)
            .await
        {
            Ok(sent) => {
                self.cache
                    .lock()
                    .await
                    .reply_map()
                    .add(message.content.clone(), sent.message_id.to_string());
                if let Some(thread_id) = sent.message_thread_id {
                    self.remember_topic(sent.message_id, thread_id).await;
                }

                if let Err(error) = self
                    .storage
                    .add(
                        self.chat_id,
                        message.chat.topic_id,
                        &message.content,
                        sent.message_id,
                        &self.muc,
                        &message.id,
                    )
                    .await
                {
                    error!(%error, "failed to persist message identity");
                }
            }
            Err(error) => error!(%error, "error while editing a message"),
        }
    }

    async fn send_event(&self, event: &Event) {
        if let Err(error) = self
            .api
            .send_text(ChatId(self.chat_id), event.content.clone(), vec![], None, None)
            .await
        {
            error!(%error, "failed to send event");
        }
    }

    async fn unbridge(&self) {
        if let Err(error) = self
            .api
            .send_text(
                ChatId(self.chat_id),
                messages::UNBRIDGE_TELEGRAM_MESSAGE.to_string(),
                vec![],
                None,
                None,
            )
            .await
        {
            error!(%error, "failed to send unbridge notice");
        }

        if let Err(error) = self.api.leave_chat(ChatId(self.chat_id)).await {
            error!(%error, "failed to leave chat on unbridge");
        }
    }
}
