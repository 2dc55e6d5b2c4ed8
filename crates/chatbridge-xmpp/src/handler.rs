//! The outbound XP direction: turns a forwardable addressed to this
//! room into an actor-sent groupchat stanza.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatbridge_core::{Attachment, ChatHandler, Event, Message, Sticker};
use chatbridge_storage::{MessageStore, StickerStore};
use jid::{BareJid, Jid};
use minidom::Element;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;
use xmpp_parsers::message::{Body, Message as XmppMessage, MessageType};

use crate::actor::{Actor, XmppActorFactory};
use crate::error::XmppResult;
use crate::messages;
use crate::text::{build_quote_body, build_reply_prefixed_body};
use crate::upload;

const REPLACE_NS: &str = "urn:xmpp:message-correct:0";
const OOB_NS: &str = "jabber:x:oob";

/// Outbound handler for one bridged pairing's XP room. Every send goes
/// through an impersonation actor chosen by sender identity, except
/// `send_event` and `unbridge`, which speak as the listener.
pub struct XmppChatHandler {
    chat_id: i64,
    muc: BareJid,
    actors: Arc<XmppActorFactory>,
    storage: MessageStore,
    stickers: StickerStore,
}

impl XmppChatHandler {
    pub fn new(
        chat_id: i64,
        muc: BareJid,
        actors: Arc<XmppActorFactory>,
        storage: MessageStore,
        stickers: StickerStore,
    ) -> Self {
        Self {
            chat_id,
            muc,
            actors,
            storage,
            stickers,
        }
    }

    async fn deliver_attachment(&self, attachment: &Attachment, sticker_file_id: Option<&str>) {
        let message = &attachment.message;
        let actor = self
            .actors
            .get_actor(&message.sender.id, &message.sender.name, &self.muc)
            .await;

        let cached = match sticker_file_id {
            Some(file_id) => self.cached_sticker_url(file_id).await,
            None => None,
        };

        let url = match cached {
            Some(url) => url,
            None => match self.resolve_upload_url(attachment, &actor).await {
                Ok(url) => url,
                Err(error) => {
                    warn!(%error, "failed to upload attachment to xmpp");
                    return;
                }
            },
        };

        if let Some(file_id) = sticker_file_id {
            if let Err(error) = self.stickers.add(file_id, &url).await {
                error!(%error, file_id, "failed to persist sticker url");
            }
        }

        if let Some(reply) = &message.reply {
            let mut guard = actor.lock().await;
            let quote_id = Uuid::new_v4().to_string();
            let quote = groupchat_message(&self.muc, &quote_id, &build_quote_body(reply), Vec::new());
            if let Err(error) = guard.send_stanza(quote).await {
                warn!(%error, "failed to send reply preview ahead of attachment");
            }
        }

        let oob = Element::builder("x", OOB_NS)
            .append(Element::builder("url", OOB_NS).append(url.clone()).build())
            .build();

        let mut guard = actor.lock().await;
        let stanza_id = Uuid::new_v4().to_string();
        let stanza = groupchat_message(&self.muc, &stanza_id, &url, vec![oob]);
        if let Err(error) = guard.send_stanza(stanza).await {
            error!(%error, "failed to send xmpp attachment message");
        }
    }

    /// A cached sticker URL survives unless a HEAD probe comes back
    /// 404 — a probe that merely fails to connect is logged and the
    /// cached URL is kept, matching the source's distinction between
    /// a real cache miss and a flaky HEAD request.
    async fn cached_sticker_url(&self, file_id: &str) -> Option<String> {
        let url = match self.stickers.get(file_id).await {
            Ok(url) => url?,
            Err(error) => {
                error!(%error, file_id, "failed to read sticker cache");
                return None;
            }
        };

        match reqwest::Client::new().head(&url).send().await {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                info!(file_id, "sticker cache miss: server returned 404");
                None
            }
            Ok(_) => Some(url),
            Err(error) => {
                warn!(%error, file_id, "head probe for cached sticker failed, keeping cached url");
                Some(url)
            }
        }
    }

    async fn resolve_upload_url(
        &self,
        attachment: &Attachment,
        actor: &Arc<Mutex<Actor>>,
    ) -> XmppResult<String> {
        let source_url = attachment
            .url_callback
            .url()
            .await
            .map_err(|error| crate::error::XmppError::Upload(error.to_string()))?;

        let response = reqwest::get(&source_url)
            .await
            .map_err(|error| crate::error::XmppError::Upload(error.to_string()))?;

        let content_type = attachment.mime.clone().unwrap_or_else(|| {
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| "application/octet-stream".to_string())
        });

        let bytes = response
            .bytes()
            .await
            .map_err(|error| crate::error::XmppError::Upload(error.to_string()))?
            .to_vec();
        let size = attachment.fsize.unwrap_or(bytes.len() as u64);

        let host = match self.actors.cached_upload_host().await {
            Some(host) => host,
            None => {
                let domain = self.actors.domain();
                let host = {
                    let mut guard = actor.lock().await;
                    upload::discover_upload_host(&mut guard, &domain).await?
                };
                self.actors.set_upload_host(host.clone()).await;
                host
            }
        };

        let slot = {
            let mut guard = actor.lock().await;
            upload::request_slot(&mut guard, &host, &attachment.message.content, size, &content_type).await?
        };

        upload::put_bytes(&slot.put_url, &content_type, bytes).await?;
        Ok(slot.get_url)
    }
}

#[async_trait]
impl ChatHandler for XmppChatHandler {
    async fn send_message(&self, message: &Message) {
        let body = match &message.reply {
            Some(reply) => build_reply_prefixed_body(reply, &message.content),
            None => message.content.clone(),
        };

        let actor = self
            .actors
            .get_actor(&message.sender.id, &message.sender.name, &self.muc)
            .await;
        let stanza_id = Uuid::new_v4().to_string();
        let stanza = groupchat_message(&self.muc, &stanza_id, &body, Vec::new());

        {
            let mut guard = actor.lock().await;
            if let Err(error) = guard.send_stanza(stanza).await {
                error!(%error, "failed to send xmpp message");
                return;
            }
        }

        let Ok(telegram_id) = message.id.parse::<i64>() else {
            warn!(id = %message.id, "origin message id is not numeric, skipping persistence");
            return;
        };
        if let Err(error) = self
            .storage
            .add(
                self.chat_id,
                message.chat.topic_id,
                &message.content,
                telegram_id,
                &self.muc.to_string(),
                &stanza_id,
            )
            .await
        {
            error!(%error, "failed to persist message identity");
        }
    }

    async fn send_attachment(&self, attachment: &Attachment) {
        self.deliver_attachment(attachment, None).await;
    }

    async fn send_sticker(&self, sticker: &Sticker) {
        self.deliver_attachment(&sticker.attachment, Some(&sticker.file_id)).await;
    }

    async fn edit_message(&self, message: &Message) {
        let entry = match self
            .storage
            .get_by_id(self.chat_id, message.chat.topic_id, &self.muc.to_string(), &message.id)
            .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                info!(id = %message.id, "no prior stanza to edit, dropping");
                return;
            }
            Err(error) => {
                error!(%error, "failed to resolve prior stanza for edit");
                return;
            }
        };

        let body = match &message.reply {
            Some(reply) => build_reply_prefixed_body(reply, &message.content),
            None => message.content.clone(),
        };

        let actor = self
            .actors
            .get_actor(&message.sender.id, &message.sender.name, &self.muc)
            .await;
        let replace = Element::builder("replace", REPLACE_NS)
            .attr("id", entry.stanza_id)
            .build();
        let stanza_id = Uuid::new_v4().to_string();
        let stanza = groupchat_message(&self.muc, &stanza_id, &body, vec![replace]);

        let mut guard = actor.lock().await;
        if let Err(error) = guard.send_stanza(stanza).await {
            error!(%error, "failed to send xmpp edit");
        }
    }

    async fn send_event(&self, event: &Event) {
        let listener = self.actors.listener();
        let mut guard = listener.lock().await;
        let stanza_id = Uuid::new_v4().to_string();
        let stanza = groupchat_message(&self.muc, &stanza_id, &event.content, Vec::new());
        if let Err(error) = guard.send_stanza(stanza).await {
            error!(%error, "failed to send xmpp event");
        }
    }

    async fn unbridge(&self) {
        {
            let listener = self.actors.listener();
            let mut guard = listener.lock().await;
            let stanza_id = Uuid::new_v4().to_string();
            let stanza = groupchat_message(&self.muc, &stanza_id, messages::UNBRIDGE_XMPP_MESSAGE, Vec::new());
            if let Err(error) = guard.send_stanza(stanza).await {
                error!(%error, "failed to send xmpp unbridge notice");
            }
        }
        self.actors.leave_room(&self.muc).await;
    }
}

fn groupchat_message(to: &BareJid, id: &str, body: &str, payloads: Vec<Element>) -> XmppMessage {
    let mut bodies = BTreeMap::new();
    bodies.insert(String::new(), Body(body.to_string()));

    XmppMessage {
        from: None,
        to: Some(Jid::Bare(to.clone())),
        id: Some(id.to_string()),
        type_: MessageType::Groupchat,
        bodies,
        subjects: BTreeMap::new(),
        thread: None,
        payloads,
    }
}
