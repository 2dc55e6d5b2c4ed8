//! The actor pool: XP does not natively carry a remote sender's
//! identity, so the bridge approximates it by logging in additional
//! sessions of the bridge's own account under distinct resources, one
//! per TG sender.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jid::{BareJid, FullJid};
use minidom::Element;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_xmpp::{AsyncClient, Event};
use tracing::{info, warn};
use xmpp_parsers::muc::Muc;
use xmpp_parsers::presence::{Presence, Show as PresenceShow, Type as PresenceType};

use crate::error::{XmppError, XmppResult};
use crate::session::SessionLifecycle;
use crate::text::ActorNameCache;

/// Session-start timeout for a freshly-connected actor.
const START_TIMEOUT: Duration = Duration::from_secs(15);
/// Bounded retry count before `get_actor` falls back to the listener.
const JOIN_ATTEMPTS: u32 = 3;
/// Memoized-name-cache capacity.
const NAME_CACHE_CAPACITY: usize = 100;
/// Nickname the listener-role sessions (the pool's internal fallback
/// actor, and the standalone inbound [`crate::listener::XmppListener`])
/// join every room under. Inbound messages carrying this nick are the
/// bridge's own echo, not user content.
pub(crate) const LISTENER_NICK: &str = "listener";

/// One impersonation session: the bridge account logged in again under
/// a resource derived from a TG sender's display name.
pub struct Actor {
    lifecycle: SessionLifecycle,
    client: Option<AsyncClient>,
}

impl Actor {
    fn new(jid: FullJid, password: String) -> Self {
        Self {
            lifecycle: SessionLifecycle::new(jid, password),
            client: None,
        }
    }

    /// Connects and waits for the session to start, bounded by
    /// [`START_TIMEOUT`].
    async fn start(&mut self) -> XmppResult<()> {
        let mut client = self.lifecycle.new_client();
        let started = timeout(START_TIMEOUT, async {
            while let Some(event) = client.next().await {
                if let Event::Online { .. } = event {
                    return true;
                }
            }
            false
        })
        .await
        .map_err(|_| XmppError::SessionStartTimeout)?;

        if !started {
            return Err(XmppError::Connect("stream closed before online".into()));
        }

        self.lifecycle.mark_connected();
        self.lifecycle.mark_session_started();
        self.client = Some(client);
        Ok(())
    }

    /// Joins `room` under this actor's resource, with no history
    /// replay (`maxstanzas=0`). Retries up to [`JOIN_ATTEMPTS`] times.
    async fn join(&mut self, room: &BareJid, resource: &str) -> XmppResult<()> {
        let Some(client) = self.client.as_mut() else {
            return Err(XmppError::Connect("actor not started".into()));
        };

        let room_jid = room
            .clone()
            .with_resource_str(resource)
            .map_err(|error| XmppError::InvalidJid(error.to_string()))?;

        let mut presence = Presence::new(PresenceType::None);
        presence = presence.with_to(room_jid.clone());
        presence.set_show(PresenceShow::Chat);
        presence.payloads.push(Muc::new().with_history_maxstanzas(0).into());

        let mut attempts = 0;
        loop {
            attempts += 1;
            if client.send(presence.clone().into()).await.is_ok() {
                self.lifecycle.remember_room(room.clone());
                return Ok(());
            }
            if attempts >= JOIN_ATTEMPTS {
                return Err(XmppError::Join {
                    room: room.to_string(),
                    source: "exhausted retries".to_string(),
                });
            }
        }
    }

    /// Sends a groupchat stanza through this actor's connection.
    pub async fn send_stanza(&mut self, stanza: xmpp_parsers::message::Message) -> XmppResult<()> {
        let Some(client) = self.client.as_mut() else {
            return Err(XmppError::Connect("actor not started".into()));
        };
        client
            .send(stanza.into())
            .await
            .map_err(|error| XmppError::Connect(error.to_string()))
    }

    /// Sends a raw IQ and awaits the matching-id response, bounded by
    /// `timeout_duration`. Used for service-discovery and XEP-0363
    /// slot requests, where the exact typed-stanza shape is less
    /// stable across `xmpp-parsers` versions than raw element
    /// construction.
    pub async fn send_iq_and_await(
        &mut self,
        iq: Element,
        timeout_duration: Duration,
    ) -> XmppResult<Element> {
        let Some(client) = self.client.as_mut() else {
            return Err(XmppError::Connect("actor not started".into()));
        };
        let id = iq.attr("id").unwrap_or_default().to_string();
        client
            .send(iq)
            .await
            .map_err(|error| XmppError::Connect(error.to_string()))?;

        let found = timeout(timeout_duration, async {
            while let Some(event) = client.next().await {
                if let Event::Stanza(element) = event {
                    if element.name() == "iq" && element.attr("id") == Some(id.as_str()) {
                        return Some(element);
                    }
                }
            }
            None
        })
        .await
        .map_err(|_| XmppError::Upload("iq timed out".into()))?;

        found.ok_or_else(|| XmppError::Upload("stream closed while awaiting iq".into()))
    }

    /// Leaves a single room (unbridge), without tearing down the rest
    /// of the session — an actor may in principle still be joined to
    /// other rooms.
    pub async fn leave_room(&mut self, room: &BareJid) {
        if !self.lifecycle.joined_rooms().any(|joined| joined == room) {
            return;
        }
        if let Some(client) = self.client.as_mut() {
            let resource = self.lifecycle.jid().resource.clone();
            if let Ok(room_jid) = room.clone().with_resource_str(&resource) {
                let mut presence = Presence::new(PresenceType::Unavailable);
                presence = presence.with_to(room_jid);
                let _ = client.send(presence.into()).await;
            }
        }
        self.lifecycle.forget_room(room);
    }

    /// Tears down the session: unavailable presence to every joined
    /// room, then drops the connection. This matters for well-behaved
    /// MUC part notices, unlike simply dropping the socket.
    pub async fn destroy(&mut self) {
        if let Some(client) = self.client.as_mut() {
            for room in self.lifecycle.joined_rooms().cloned().collect::<Vec<_>>() {
                let resource = self.lifecycle.jid().resource.clone();
                if let Ok(room_jid) = room.clone().with_resource_str(&resource) {
                    let mut presence = Presence::new(PresenceType::Unavailable);
                    presence = presence.with_to(room_jid);
                    let _ = client.send(presence.into()).await;
                }
            }
            let _ = client.send_end().await;
        }
        self.lifecycle.mark_torn_down();
        self.client = None;
    }
}

struct ActorPool {
    actors: HashMap<String, Arc<Mutex<Actor>>>,
    order: VecDeque<String>,
    limit: usize,
}

impl ActorPool {
    fn new(limit: usize) -> Self {
        Self {
            actors: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|existing| existing != key);
        self.order.push_back(key.to_string());
    }
}

/// Owns the bounded pool of per-sender actor sessions and hands out
/// one for a given TG user, joining the target room on demand.
pub struct XmppActorFactory {
    bridge_jid: BareJid,
    password: String,
    pool: Mutex<ActorPool>,
    names: Mutex<ActorNameCache>,
    listener: Arc<Mutex<Actor>>,
    listener_rooms: mpsc::UnboundedSender<BareJid>,
    upload_host: Mutex<Option<String>>,
}

impl XmppActorFactory {
    /// `listener_rooms` forwards every room a pairing is confirmed for
    /// to the standalone [`crate::listener::XmppListener`] so it joins
    /// the same rooms this factory's internal fallback actor does —
    /// that session is the one whose continuous stanza loop actually
    /// delivers inbound groupchat messages to the dispatcher.
    pub fn new(
        bridge_jid: BareJid,
        password: impl Into<String>,
        pool_limit: usize,
        listener_rooms: mpsc::UnboundedSender<BareJid>,
    ) -> Self {
        let password = password.into();
        let listener_jid: FullJid = format!("{bridge_jid}/listener")
            .parse()
            .expect("bare jid plus a literal resource is always a valid full jid");
        Self {
            bridge_jid,
            password: password.clone(),
            pool: Mutex::new(ActorPool::new(pool_limit)),
            names: Mutex::new(ActorNameCache::new(NAME_CACHE_CAPACITY)),
            listener: Arc::new(Mutex::new(Actor::new(listener_jid, password))),
            listener_rooms,
            upload_host: Mutex::new(None),
        }
    }

    /// A handle to the shared listener session, used as the join
    /// fallback and for `send_event`/`unbridge`.
    pub fn listener(&self) -> Arc<Mutex<Actor>> {
        self.listener.clone()
    }

    /// Connects the fallback listener session. Must be awaited once at
    /// startup before any handler uses [`listener`](Self::listener) —
    /// unlike pooled actors, this one is not started lazily on first
    /// use, since `send_event`/`unbridge` cannot tolerate the extra
    /// connect latency on their first call.
    pub async fn start_listener(&self) -> XmppResult<()> {
        self.listener.lock().await.start().await
    }

    /// Joins `room` as the listener nick: the pool's internal fallback
    /// actor (so `send_event`/`unbridge` don't hit a "not an occupant"
    /// error), and the standalone inbound listener session, notified
    /// through `listener_rooms`. Called once per confirmed pairing,
    /// both on a fresh bind and on startup replay of every persisted
    /// row.
    pub async fn join_listener(&self, room: &BareJid) -> XmppResult<()> {
        self.listener.lock().await.join(room, LISTENER_NICK).await?;
        let _ = self.listener_rooms.send(room.clone());
        Ok(())
    }

    /// The domain service-discovery walks to find an HTTP upload host.
    pub fn domain(&self) -> String {
        self.bridge_jid.domain().to_string()
    }

    pub async fn cached_upload_host(&self) -> Option<String> {
        self.upload_host.lock().await.clone()
    }

    pub async fn set_upload_host(&self, host: String) {
        *self.upload_host.lock().await = Some(host);
    }

    /// The five-step `get_actor` sequence: normalize the name into a
    /// resource, bump-or-create the session, evict on overflow, join
    /// the room with a listener fallback on failure.
    pub async fn get_actor(
        &self,
        user_id: &str,
        user_name: &str,
        room: &BareJid,
    ) -> Arc<Mutex<Actor>> {
        let resource = self.names.lock().await.resource_for(user_name);

        let existing = {
            let mut pool = self.pool.lock().await;
            if let Some(actor) = pool.actors.get(user_id).cloned() {
                pool.touch(user_id);
                Some(actor)
            } else {
                None
            }
        };

        let actor = match existing {
            Some(actor) => actor,
            None => {
                let jid: FullJid = match format!("{}/{resource}", self.bridge_jid).parse() {
                    Ok(jid) => jid,
                    Err(_) => return self.listener.clone(),
                };
                let actor = Arc::new(Mutex::new(Actor::new(jid, self.password.clone())));
                if actor.lock().await.start().await.is_err() {
                    warn!(user_id, "actor session failed to start, using listener");
                    return self.listener.clone();
                }

                let mut pool = self.pool.lock().await;
                pool.actors.insert(user_id.to_string(), actor.clone());
                pool.touch(user_id);
                self.evict_overflow(&mut pool).await;
                actor
            }
        };

        let joined = {
            let mut guard = actor.lock().await;
            guard.join(room, &resource).await
        };

        match joined {
            Ok(()) => actor,
            Err(error) => {
                warn!(%error, user_id, "actor failed to join room, falling back to listener");
                self.listener.clone()
            }
        }
    }

    /// Unbridge: every live actor (and the listener) leaves `room`,
    /// without tearing down their sessions entirely.
    pub async fn leave_room(&self, room: &BareJid) {
        self.listener.lock().await.leave_room(room).await;

        let actors = self.pool.lock().await.actors.values().cloned().collect::<Vec<_>>();
        for actor in actors {
            actor.lock().await.leave_room(room).await;
        }
    }

    async fn evict_overflow(&self, pool: &mut ActorPool) {
        while pool.order.len() > pool.limit {
            let Some(oldest) = pool.order.pop_front() else {
                break;
            };
            if let Some(actor) = pool.actors.remove(&oldest) {
                info!(user_id = oldest, "evicting least-recently-used actor");
                actor.lock().await.destroy().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_pool_touch_reorders_lru() {
        let mut pool = ActorPool::new(2);
        pool.order.push_back("a".to_string());
        pool.order.push_back("b".to_string());
        pool.touch("a");
        assert_eq!(pool.order, VecDeque::from(["b".to_string(), "a".to_string()]));
    }

    #[test]
    fn actor_pool_limit_clamped_to_one() {
        let pool = ActorPool::new(0);
        assert_eq!(pool.limit, 1);
    }
}
