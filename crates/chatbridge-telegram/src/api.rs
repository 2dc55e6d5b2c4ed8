//! Thin retry/rate-limit wrapper around `teloxide::Bot`.
//!
//! `teloxide` already supplies typed request builders for every TG
//! method, which is the typed-dispatch redesign the original
//! "dynamic attribute access" interface called for. What this module
//! adds is the bridge's own retry contract: exhaust five attempts on
//! transient network failures, and retry without limit (honoring
//! `retry_after`) on HTTP 429.

use std::future::Future;
use std::time::Duration;

use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{MessageEntity, MessageId, ThreadId};
use teloxide::ApiError;
use teloxide::RequestError;
use tracing::warn;

use crate::error::{TelegramError, TelegramResult};

/// Attempt cap for connection/timeout-class failures. Rate-limit
/// retries do not count against this.
const MAX_ATTEMPTS: u32 = 5;

/// Identifiers the outbound handler needs back from a send/edit call:
/// the TG message id, and — when the message landed inside a forum
/// topic — that topic's thread id.
#[derive(Debug, Clone, Copy)]
pub struct SentMessage {
    pub message_id: i64,
    pub message_thread_id: Option<i64>,
}

/// Wraps a `teloxide::Bot` with the bridge's retry/rate-limit policy.
#[derive(Clone)]
pub struct TelegramApi {
    bot: Bot,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Runs `request`, retrying on transient failure per the bridge's
    /// taxonomy: unlimited retries honoring `retry_after` on rate
    /// limit, up to [`MAX_ATTEMPTS`] on connection/timeout errors,
    /// and an immediate typed [`TelegramError::Api`] on any other
    /// non-429 API error.
    pub async fn with_retry<T, F, Fut>(&self, mut request: F) -> TelegramResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempts: u32 = 0;

        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(RequestError::RetryAfter(retry_after)) => {
                    warn!(seconds = retry_after.seconds(), "telegram rate limit hit");
                    tokio::time::sleep(Duration::from_secs(u64::from(retry_after.seconds())))
                        .await;
                }
                Err(RequestError::Api(ApiError::Unknown(description))) => {
                    return Err(TelegramError::Api { description });
                }
                Err(RequestError::Api(api_error)) => {
                    return Err(TelegramError::Api {
                        description: api_error.to_string(),
                    });
                }
                Err(other) => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        warn!(%other, "telegram request exhausted retries");
                        return Err(TelegramError::Exhausted);
                    }
                    warn!(%other, attempts, "transient telegram error, retrying");
                }
            }
        }
    }

    /// Builds the single bold entity covering a sender-name prefix,
    /// offset 0, length `sender.chars().count()` — used identically
    /// for `sendMessage`, `sendDocument`'s caption, and
    /// `editMessageText`.
    pub fn bold_sender_entity(sender: &str) -> MessageEntity {
        MessageEntity::bold(0, sender.encode_utf16().count())
    }

    pub async fn send_text(
        &self,
        chat_id: ChatId,
        text: String,
        entities: Vec<MessageEntity>,
        reply_to_message_id: Option<i64>,
        message_thread_id: Option<i64>,
    ) -> TelegramResult<SentMessage> {
        let message = self
            .with_retry(|| {
                let mut request = self.bot.send_message(chat_id, text.clone()).entities(entities.clone());
                if let Some(reply_to) = reply_to_message_id {
                    request = request.reply_to_message_id(MessageId(reply_to as i32));
                }
                if let Some(thread_id) = message_thread_id {
                    request = request.message_thread_id(ThreadId(MessageId(thread_id as i32)));
                }
                request.send()
            })
            .await?;

        Ok(to_sent_message(&message))
    }

    pub async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: i64,
        text: String,
        entities: Vec<MessageEntity>,
    ) -> TelegramResult<SentMessage> {
        let message = self
            .with_retry(|| {
                self.bot
                    .edit_message_text(chat_id, MessageId(message_id as i32), text.clone())
                    .entities(entities.clone())
                    .send()
            })
            .await?;

        Ok(to_sent_message(&message))
    }

    pub async fn leave_chat(&self, chat_id: ChatId) -> TelegramResult<()> {
        self.with_retry(|| self.bot.leave_chat(chat_id).send())
            .await?;
        Ok(())
    }

    /// Uploads a downloaded attachment body via the TG method the
    /// MIME type selects (`sendAnimation`/`sendPhoto`/`sendVideo`/
    /// `sendAudio`/`sendDocument`).
    pub async fn send_media(
        &self,
        chat_id: ChatId,
        kind: MediaKind,
        bytes: Vec<u8>,
        filename: String,
        caption: String,
        caption_entities: Vec<MessageEntity>,
        message_thread_id: Option<i64>,
    ) -> TelegramResult<SentMessage> {
        let message = self
            .with_retry(|| {
                let file = teloxide::types::InputFile::memory(bytes.clone()).file_name(filename.clone());
                let caption = caption.clone();
                let caption_entities = caption_entities.clone();
                let thread_id = message_thread_id.map(|id| ThreadId(MessageId(id as i32)));

                async move {
                    match kind {
                        MediaKind::Animation => {
                            let mut request = self
                                .bot
                                .send_animation(chat_id, file)
                                .caption(caption)
                                .caption_entities(caption_entities);
                            if let Some(thread_id) = thread_id {
                                request = request.message_thread_id(thread_id);
                            }
                            request.await
                        }
                        MediaKind::Photo => {
                            let mut request = self
                                .bot
                                .send_photo(chat_id, file)
                                .caption(caption)
                                .caption_entities(caption_entities);
                            if let Some(thread_id) = thread_id {
                                request = request.message_thread_id(thread_id);
                            }
                            request.await
                        }
                        MediaKind::Video => {
                            let mut request = self
                                .bot
                                .send_video(chat_id, file)
                                .caption(caption)
                                .caption_entities(caption_entities);
                            if let Some(thread_id) = thread_id {
                                request = request.message_thread_id(thread_id);
                            }
                            request.await
                        }
                        MediaKind::Audio => {
                            let mut request = self
                                .bot
                                .send_audio(chat_id, file)
                                .caption(caption)
                                .caption_entities(caption_entities);
                            if let Some(thread_id) = thread_id {
                                request = request.message_thread_id(thread_id);
                            }
                            request.await
                        }
                        MediaKind::Document => {
                            let mut request = self
                                .bot
                                .send_document(chat_id, file)
                                .caption(caption)
                                .caption_entities(caption_entities);
                            if let Some(thread_id) = thread_id {
                                request = request.message_thread_id(thread_id);
                            }
                            request.await
                        }
                    }
                }
            })
            .await?;

        Ok(to_sent_message(&message))
    }
}

/// The TG send method an attachment's MIME type selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Animation,
    Photo,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// `image/gif` -> animation; `image/*` -> photo; `video/*` ->
    /// video; `audio/*` -> audio; everything else -> document.
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime {
            Some("image/gif") => MediaKind::Animation,
            Some(mime) if mime.starts_with("image") => MediaKind::Photo,
            Some(mime) if mime.starts_with("video") => MediaKind::Video,
            Some(mime) if mime.starts_with("audio") => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

fn to_sent_message(message: &teloxide::types::Message) -> SentMessage {
    SentMessage {
        message_id: i64::from(message.id.0),
        message_thread_id: message.thread_id.map(|id| i64::from(id.0 .0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_sender_entity_covers_full_prefix() {
        let entity = TelegramApi::bold_sender_entity("Al");
        assert_eq!(entity.offset, 0);
        assert_eq!(entity.length, 2);
    }

    // --- MediaKind::from_mime ---

    #[test]
    fn gif_selects_animation() {
        assert_eq!(MediaKind::from_mime(Some("image/gif")), MediaKind::Animation);
    }

    #[test]
    fn other_image_selects_photo() {
        assert_eq!(MediaKind::from_mime(Some("image/png")), MediaKind::Photo);
    }

    #[test]
    fn video_selects_video() {
        assert_eq!(MediaKind::from_mime(Some("video/mp4")), MediaKind::Video);
    }

    #[test]
    fn audio_selects_audio() {
        assert_eq!(MediaKind::from_mime(Some("audio/ogg")), MediaKind::Audio);
    }

    #[test]
    fn unknown_and_missing_mime_select_document() {
        assert_eq!(MediaKind::from_mime(Some("application/zip")), MediaKind::Document);
        assert_eq!(MediaKind::from_mime(None), MediaKind::Document);
    }
}
