//! Maps `teloxide` message types onto plain extraction results: body
//! text, reply-quote text, sender identity, and the attachment
//! priority chain. Assembling these into a `Forwardable` is the
//! poller's job, since that also needs persistence lookups.

use std::sync::Arc;

use async_trait::async_trait;
use chatbridge_core::{BoxedUrlCallback, UrlCallback, UrlCallbackError};
use teloxide::prelude::*;

/// Lazily resolves a TG `file_id` to a downloadable URL on each
/// access. TG file paths are short-lived, so this must not be cached
/// past a single use — `url()` always hits `getFile` fresh.
pub struct TelegramFileUrl {
    bot: Bot,
    file_id: String,
}

impl TelegramFileUrl {
    pub fn new(bot: Bot, file_id: impl Into<String>) -> Self {
        Self {
            bot,
            file_id: file_id.into(),
        }
    }

    pub fn boxed(bot: Bot, file_id: impl Into<String>) -> BoxedUrlCallback {
        Arc::new(Self::new(bot, file_id))
    }
}

#[async_trait]
impl UrlCallback for TelegramFileUrl {
    async fn url(&self) -> Result<String, UrlCallbackError> {
        let file = self
            .bot
            .get_file(&self.file_id)
            .send()
            .await
            .map_err(|error| UrlCallbackError::Resolve(error.to_string()))?;

        Ok(format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot.token(),
            file.path
        ))
    }
}

/// A TG attachment before download: enough to build a core
/// `Attachment` once wrapped in a `Message`.
#[derive(Debug, Clone)]
pub struct ExtractedAttachment {
    pub file_id: String,
    pub filename: String,
    pub mime: Option<String>,
    pub fsize: Option<u64>,
}

/// Extracts the forwardable attachment from a message, if any.
/// Priority order: sticker (animated/video stickers are skipped) ->
/// photo (largest size) -> video | video_note | animation -> voice ->
/// audio -> document.
pub fn extract_attachment(message: &teloxide::types::Message) -> Option<ExtractedAttachment> {
    if let Some(sticker) = message.sticker() {
        if sticker.is_animated || sticker.is_video {
            return None;
        }
        return Some(ExtractedAttachment {
            file_id: sticker.file.id.clone(),
            filename: format!("{}.webp", sticker.file.unique_id),
            mime: Some("image/webp".to_string()),
            fsize: Some(u64::from(sticker.file.size)),
        });
    }

    if let Some(largest) = message.photo().and_then(<[_]>::last) {
        return Some(ExtractedAttachment {
            file_id: largest.file.id.clone(),
            filename: format!("{}.jpg", largest.file.unique_id),
            mime: Some("image/jpeg".to_string()),
            fsize: Some(u64::from(largest.file.size)),
        });
    }

    if let Some(video) = message.video() {
        return Some(ExtractedAttachment {
            file_id: video.file.id.clone(),
            filename: video
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.mp4", video.file.unique_id)),
            mime: video.mime_type.as_ref().map(ToString::to_string),
            fsize: Some(u64::from(video.file.size)),
        });
    }

    if let Some(note) = message.video_note() {
        return Some(ExtractedAttachment {
            file_id: note.file.id.clone(),
            filename: format!("{}.mp4", note.file.unique_id),
            mime: Some("video/mp4".to_string()),
            fsize: Some(u64::from(note.file.size)),
        });
    }

    if let Some(animation) = message.animation() {
        return Some(ExtractedAttachment {
            file_id: animation.file.id.clone(),
            filename: animation
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.mp4", animation.file.unique_id)),
            mime: animation.mime_type.as_ref().map(ToString::to_string),
            fsize: Some(u64::from(animation.file.size)),
        });
    }

    if let Some(voice) = message.voice() {
        return Some(ExtractedAttachment {
            file_id: voice.file.id.clone(),
            filename: format!("{}.ogg", voice.file.unique_id),
            mime: Some(
                voice
                    .mime_type
                    .as_ref()
                    .map_or_else(|| "audio/ogg".to_string(), ToString::to_string),
            ),
            fsize: Some(u64::from(voice.file.size)),
        });
    }

    if let Some(audio) = message.audio() {
        return Some(ExtractedAttachment {
            file_id: audio.file.id.clone(),
            filename: audio
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.mp3", audio.file.unique_id)),
            mime: audio.mime_type.as_ref().map(ToString::to_string),
            fsize: Some(u64::from(audio.file.size)),
        });
    }

    if let Some(document) = message.document() {
        return Some(ExtractedAttachment {
            file_id: document.file.id.clone(),
            filename: document
                .file_name
                .clone()
                .unwrap_or_else(|| document.file.unique_id.clone()),
            mime: document.mime_type.as_ref().map(ToString::to_string),
            fsize: Some(u64::from(document.file.size)),
        });
    }

    None
}

/// Plain text or caption body of a message, if present.
pub fn extract_text(message: &teloxide::types::Message) -> Option<String> {
    message
        .text()
        .or_else(|| message.caption())
        .map(str::to_string)
}

/// Reply-quote body: the replied-to message's text/caption, or, for a
/// media-only quote, the synthesized attachment filename.
pub fn extract_reply(message: &teloxide::types::Message) -> Option<String> {
    let replied = message.reply_to_message()?;
    extract_text(replied).or_else(|| extract_attachment(replied).map(|attachment| attachment.filename))
}

pub fn sender_name(message: &teloxide::types::Message) -> String {
    message
        .from()
        .map(|user| user.full_name())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn sender_id(message: &teloxide::types::Message) -> String {
    message
        .from()
        .map(|user| user.id.0.to_string())
        .unwrap_or_default()
}

pub fn message_thread_id(message: &teloxide::types::Message) -> Option<i64> {
    message.thread_id.map(|id| i64::from(id.0 .0))
}

#[cfg(test)]
mod tests {
    use super::*;

    // extract_attachment/extract_text/extract_reply all take live
    // teloxide::types::Message values that are impractical to
    // construct by hand here (most fields are private with no public
    // constructor); they are exercised indirectly through the poller
    // integration tests instead.

    #[test]
    fn telegram_file_url_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TelegramFileUrl>();
    }
}
