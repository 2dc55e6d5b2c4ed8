//! The listener session: a long-running client logged in under the
//! bridge's own account. Handles room invitations, inbound groupchat
//! messages, and the connect/reconnect lifecycle.

use std::sync::Arc;

use chatbridge_core::{Attachment, Chat, ChatAddress, Forwardable, Message, Sender, StaticUrl};
use chatbridge_core::text::TELEGRAM_SUFFIX;
use chatbridge_dispatcher::DispatcherSender;
use chatbridge_service::ChatService;
use futures::StreamExt;
use jid::{BareJid, Jid};
use minidom::Element;
use tokio::sync::mpsc;
use tokio_xmpp::{AsyncClient, Event};
use tracing::{info, warn};
use xmpp_parsers::message::{Message as XmppMessage, MessageType};
use xmpp_parsers::muc::Muc;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use crate::actor::LISTENER_NICK;
use crate::session::SessionLifecycle;
use crate::text::parse_body;

/// Text XP sends back on a groupchat send from a session that dropped
/// out of the room; on a match the room is rejoined rather than the
/// message being silently dropped.
const OCCUPANT_ERROR_TEXT: &str = "Only occupants are allowed to send messages to the conference";

/// A direct (`jabber:x:conference`) or mediated MUC invitation.
struct Invitation {
    room: BareJid,
    reason: String,
}

pub struct XmppListener {
    lifecycle: SessionLifecycle,
    service: Arc<ChatService>,
    dispatcher: DispatcherSender,
}

impl XmppListener {
    pub fn new(jid: jid::FullJid, password: impl Into<String>, service: Arc<ChatService>, dispatcher: DispatcherSender) -> Self {
        Self {
            lifecycle: SessionLifecycle::new(jid, password),
            service,
            dispatcher,
        }
    }

    /// Runs the connect/reconnect loop forever. `join_rooms` carries
    /// rooms this session should join, sent by
    /// [`crate::actor::XmppActorFactory::join_listener`] as pairings
    /// are confirmed or replayed at startup.
    pub async fn run(mut self, mut join_rooms: mpsc::UnboundedReceiver<BareJid>) {
        loop {
            let mut client = self.lifecycle.new_client();
            let mut rejoin_on_start: Vec<BareJid> =
                self.lifecycle.joined_rooms().cloned().collect();

            loop {
                tokio::select! {
                    room = join_rooms.recv() => {
                        match room {
                            Some(room) => {
                                if join_room(&mut client, &room).await {
                                    self.lifecycle.remember_room(room);
                                }
                            }
                            None => {}
                        }
                    }
                    event = client.next() => {
                        let Some(event) = event else { break };
                        match event {
                            Event::Online { .. } => {
                                self.lifecycle.mark_connected();
                                let presence = Presence::new(PresenceType::None);
                                let _ = futures::SinkExt::send(&mut client, presence.into()).await;
                                self.lifecycle.mark_session_started();
                                info!("xmpp listener session started");
                                for room in rejoin_on_start.drain(..) {
                                    let _ = join_room(&mut client, &room).await;
                                }
                            }
                            Event::Disconnected(_) => {
                                if self.lifecycle.should_reconnect() {
                                    warn!("xmpp listener disconnected, reconnecting after backoff");
                                }
                                break;
                            }
                            Event::Stanza(element) => self.handle_stanza(&element, &mut client).await,
                        }
                    }
                }
            }

            if !self.lifecycle.should_reconnect() {
                return;
            }
            SessionLifecycle::wait_backoff().await;
        }
    }

    async fn handle_stanza(&mut self, element: &Element, client: &mut AsyncClient) {
        if let Some(room) = occupant_error_room(element) {
            warn!(room = %room, "not an occupant, rejoining room");
            if join_room(client, &room).await {
                self.lifecycle.remember_room(room);
            }
            return;
        }

        if let Some(invitation) = extract_invitation(element) {
            self.service
                .bind(&invitation.room.to_string(), &invitation.reason)
                .await;
            return;
        }

        if element.name() != "message" {
            return;
        }

        let Ok(message) = XmppMessage::try_from(element.clone()) else {
            return;
        };
        if message.type_ != MessageType::Groupchat {
            return;
        }

        let Some(Jid::Full(from)) = message.from.clone() else {
            return;
        };
        let nick = from.resource.as_str();
        if nick == LISTENER_NICK || nick.ends_with(TELEGRAM_SUFFIX) {
            return;
        }

        let room = from.to_bare();
        let chat = Chat::new(ChatAddress::from(room.to_string()));
        let sender = Sender::new(nick, nick);

        if let Some(attachment) = extract_oob_attachment(element, &chat, &sender) {
            self.dispatcher.enqueue(Forwardable::Attachment(attachment)).await;
            return;
        }

        let Some(body) = message.bodies.get("") else {
            return;
        };
        let parsed = parse_body(&body.0);
        let edit = extract_replace_id(element);

        let id = match &edit {
            Some(replace_id) => replace_id.clone(),
            None => message.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        };

        let domain_message = Message {
            id,
            chat,
            sender,
            content: parsed.body,
            reply: parsed.reply,
            edit: edit.is_some(),
        };

        self.dispatcher
            .enqueue(Forwardable::Message(domain_message))
            .await;
    }
}

/// Sends MUC join presence (no history replay) into `room` under
/// [`LISTENER_NICK`].
async fn join_room(client: &mut AsyncClient, room: &BareJid) -> bool {
    let Ok(room_jid) = room.clone().with_resource_str(LISTENER_NICK) else {
        return false;
    };
    let mut presence = Presence::new(PresenceType::None);
    presence = presence.with_to(room_jid);
    presence.payloads.push(Muc::new().with_history_maxstanzas(0).into());
    futures::SinkExt::send(client, presence.into()).await.is_ok()
}

/// Detects a groupchat `<message type="error">` carrying the "not an
/// occupant" condition, returning the room it was sent from.
fn occupant_error_room(element: &Element) -> Option<BareJid> {
    if element.name() != "message" || element.attr("type") != Some("error") {
        return None;
    }
    let error = element.children().find(|child| child.name() == "error")?;
    if !error.text().contains(OCCUPANT_ERROR_TEXT) {
        return None;
    }
    match element.attr("from")?.parse::<Jid>().ok()? {
        Jid::Bare(bare) => Some(bare),
        Jid::Full(full) => Some(full.to_bare()),
    }
}

/// Looks for a direct `jabber:x:conference` invite or a mediated
/// `http://jabber.org/protocol/muc#user` invite child, returning the
/// room and the reason text (the pairing handshake key).
fn extract_invitation(element: &Element) -> Option<Invitation> {
    if element.name() != "message" {
        return None;
    }

    if let Some(direct) = element.get_child("x", "jabber:x:conference") {
        let room: BareJid = direct.attr("jid")?.parse().ok()?;
        let reason = direct.attr("reason").unwrap_or_default().to_string();
        return Some(Invitation { room, reason });
    }

    let user_x = element.get_child("x", "http://jabber.org/protocol/muc#user")?;
    let invite = user_x.get_child("invite", "http://jabber.org/protocol/muc#user")?;
    let room: BareJid = element.attr("from")?.parse().ok()?;
    let reason = invite
        .get_child("reason", "http://jabber.org/protocol/muc#user")
        .map(|reason| reason.text())
        .unwrap_or_default();

    Some(Invitation { room, reason })
}

/// XEP-0066 out-of-band URL: a miss-free attachment shortcut — the
/// bridge never downloads, it just re-exposes the URL verbatim.
fn extract_oob_attachment(
    element: &Element,
    chat: &Chat,
    sender: &Sender,
) -> Option<Attachment> {
    let oob = element.get_child("x", "jabber:x:oob")?;
    let url = oob.get_child("url", "jabber:x:oob")?.text();
    let filename = url.rsplit('/').next().unwrap_or(&url).to_string();

    Some(Attachment {
        message: Message {
            id: uuid::Uuid::new_v4().to_string(),
            chat: chat.clone(),
            sender: sender.clone(),
            content: filename,
            reply: None,
            edit: false,
        },
        url_callback: StaticUrl::boxed(url),
        mime: None,
        fsize: None,
    })
}

/// XEP-0308 message-correction: the prior stanza id this message
/// replaces, if any.
fn extract_replace_id(element: &Element) -> Option<String> {
    element
        .get_child("replace", "urn:xmpp:message-correct:0")
        .and_then(|replace| replace.attr("id"))
        .map(str::to_string)
}
