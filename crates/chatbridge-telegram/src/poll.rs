//! Long-poll loop over `getUpdates`: turns TG updates into
//! forwardables for the dispatcher, and handles the unauthenticated
//! pairing command directly.

use std::sync::Arc;
use std::time::Duration;

use chatbridge_core::{Attachment, Chat, ChatAddress, Forwardable, Message, Sender, Sticker};
use chatbridge_dispatcher::DispatcherSender;
use chatbridge_service::ChatService;
use chatbridge_storage::ChatStore;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, ChatMemberKind, MessageKind, UpdateKind};
use tracing::{error, info, warn};

use crate::messages;
use crate::model::{self, TelegramFileUrl};

const BRIDGE_COMMAND: &str = "/jabagram";
/// `getUpdates` long-poll timeout, seconds.
const POLL_TIMEOUT: u32 = 30;

/// Runs the TG long-poll loop until the process is shut down.
pub struct TelegramPoller {
    bot: Bot,
    chats: ChatStore,
    service: Arc<ChatService>,
    dispatcher: DispatcherSender,
}

impl TelegramPoller {
    pub fn new(
        bot: Bot,
        chats: ChatStore,
        service: Arc<ChatService>,
        dispatcher: DispatcherSender,
    ) -> Self {
        Self {
            bot,
            chats,
            service,
            dispatcher,
        }
    }

    /// Polls `getUpdates` forever, advancing the offset only after a
    /// non-empty batch has been fully processed.
    pub async fn run(mut self) {
        let me = match self.bot.get_me().send().await {
            Ok(me) => me,
            Err(error) => {
                error!(%error, "failed to resolve bot identity, aborting poll loop");
                return;
            }
        };
        let bot_user_id = me.user.id;

        let mut offset: i32 = 0;
        loop {
            let updates = self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(POLL_TIMEOUT)
                .allowed_updates(vec![
                    AllowedUpdate::Message,
                    AllowedUpdate::EditedMessage,
                    AllowedUpdate::MyChatMember,
                ])
                .send()
                .await;

            let updates = match updates {
                Ok(updates) => updates,
                Err(error) => {
                    warn!(%error, "getUpdates failed, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if updates.is_empty() {
                continue;
            }

            for update in &updates {
                self.handle_update(update, bot_user_id).await;
            }

            if let Some(last) = updates.last() {
                offset = last.id.0 as i32 + 1;
            }
        }
    }

    async fn handle_update(&self, update: &Update, bot_user_id: teloxide::types::UserId) {
        match &update.kind {
            UpdateKind::Message(message) => self.handle_message(message, false).await,
            UpdateKind::EditedMessage(message) => self.handle_message(message, true).await,
            UpdateKind::MyChatMember(changed) => {
                if changed.new_chat_member.user.id != bot_user_id {
                    return;
                }
                if matches!(
                    changed.new_chat_member.kind,
                    ChatMemberKind::Left | ChatMemberKind::Banned(_)
                ) {
                    info!(chat_id = changed.chat.id.0, "bot removed from telegram chat");
                    // Addressed to the peer XP room: the side that
                    // detects the kick notifies the *other* network,
                    // which is whose handler posts the canned notice.
                    if let Ok(Some((_, muc))) =
                        self.chats.pair_for(&changed.chat.id.0.to_string()).await
                    {
                        self.dispatcher
                            .enqueue(Forwardable::Unbridge(Chat::new(ChatAddress::from(muc))))
                            .await;
                    }
                }
            }
            _ => {}
        }
    }

    async fn handle_message(&self, message: &teloxide::types::Message, edited: bool) {
        let chat_id = message.chat.id.0;

        if let MessageKind::Common(_) = &message.kind {
            if let Some(text) = message.text() {
                if let Some(pairing) = parse_bridge_command(text) {
                    self.handle_bridge_command(chat_id, pairing).await;
                    return;
                }
            }
        }

        let Some((_, muc)) = self.chats.pair_for(&chat_id.to_string()).await.unwrap_or(None) else {
            return;
        };

        // Addressed to the paired XP room: the dispatcher routes by
        // destination address, and the destination for anything
        // originating in this TG chat is its peer room. The topic id
        // (if this is a forum chat) rides along so the message store
        // can scope reply/edit lookups to the originating thread.
        let chat = match model::message_thread_id(message) {
            Some(topic_id) => Chat::with_topic(ChatAddress::from(muc), topic_id),
            None => Chat::new(ChatAddress::from(muc)),
        };
        let sender = Sender {
            name: model::sender_name(message),
            id: model::sender_id(message),
        };
        let reply = model::extract_reply(message);

        if let Some(attachment) = model::extract_attachment(message) {
            let inner = Message {
                id: message.id.0.to_string(),
                chat: chat.clone(),
                sender,
                content: attachment.filename,
                reply,
                edit: edited,
            };
            let url_callback = TelegramFileUrl::boxed(self.bot.clone(), attachment.file_id.clone());
            let forwardable = if message.sticker().is_some() {
                Forwardable::Sticker(Sticker {
                    attachment: Attachment {
                        message: inner,
                        url_callback,
                        mime: attachment.mime,
                        fsize: attachment.fsize,
                    },
                    file_id: attachment.file_id,
                })
            } else {
                Forwardable::Attachment(Attachment {
                    message: inner,
                    url_callback,
                    mime: attachment.mime,
                    fsize: attachment.fsize,
                })
            };
            self.dispatcher.enqueue(forwardable).await;
            return;
        }

        let Some(content) = model::extract_text(message) else {
            return;
        };

        let domain_message = Message {
            id: message.id.0.to_string(),
            chat,
            sender,
            content,
            reply,
            edit: edited,
        };

        self.dispatcher
            .enqueue(Forwardable::Message(domain_message))
            .await;
    }

    async fn handle_bridge_command(&self, chat_id: i64, room: Option<String>) {
        let reply = match room {
            None => messages::MISSING_MUC_JID_MESSAGE.to_string(),
            Some(room) if !looks_like_muc_jid(&room) => messages::INVALID_JID_MESSAGE.to_string(),
            Some(room) => {
                self.service.pending(room, chat_id).await;
                messages::QUEUEING_MESSAGE.to_string()
            }
        };

        let text_message = self.bot.send_message(ChatId(chat_id), reply);
        if let Err(error) = text_message.send().await {
            error!(%error, "failed to reply to bridge command");
        }
    }
}

/// Parses `/jabagram <room>`, returning `Some(None)` for a bare
/// command with no argument and `Some(Some(room))` otherwise. Returns
/// `None` when the text is not the bridge command at all.
fn parse_bridge_command(text: &str) -> Option<Option<String>> {
    let rest = text.strip_prefix(BRIDGE_COMMAND)?;
    let room = rest.trim();
    if room.is_empty() {
        Some(None)
    } else {
        Some(Some(room.to_string()))
    }
}

/// Minimal shape check for a MUC JID: `local@domain`, non-empty on
/// both sides.
fn looks_like_muc_jid(candidate: &str) -> bool {
    match candidate.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_command_as_missing_argument() {
        assert_eq!(parse_bridge_command("/jabagram"), Some(None));
        assert_eq!(parse_bridge_command("/jabagram   "), Some(None));
    }

    #[test]
    fn parses_command_with_room_argument() {
        assert_eq!(
            parse_bridge_command("/jabagram room@conference.example.org"),
            Some(Some("room@conference.example.org".to_string()))
        );
    }

    #[test]
    fn ignores_unrelated_text() {
        assert_eq!(parse_bridge_command("hello there"), None);
    }

    #[test]
    fn validates_jid_shape() {
        assert!(looks_like_muc_jid("room@conference.example.org"));
        assert!(!looks_like_muc_jid("not-a-jid"));
        assert!(!looks_like_muc_jid("@conference.example.org"));
        assert!(!looks_like_muc_jid("room@"));
        assert!(!looks_like_muc_jid("a@b@c"));
    }
}
