//! The pairing handshake: an in-memory pending-room table, handshake
//! key validation, and fan-out to every registered handler factory.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::collections::HashMap;
use std::sync::Arc;

use chatbridge_core::ChatHandlerFactory;
use chatbridge_storage::ChatStore;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct Pending {
    /// `xp_room -> tg_chat_id`.
    by_room: HashMap<String, i64>,
    /// `tg_chat_id -> xp_room`, kept so a re-issued `/jabagram` from
    /// the same chat can find and drop its previous pending room.
    by_chat: HashMap<i64, String>,
}

impl Pending {
    fn new() -> Self {
        Self {
            by_room: HashMap::new(),
            by_chat: HashMap::new(),
        }
    }
}

/// Maintains pending pairings and the list of registered handler
/// factories. The handshake secret is compared with plain equality —
/// spec.md is explicit that no cryptographic properties are required
/// here, so this intentionally does not reach for `subtle`.
pub struct ChatService {
    chats: ChatStore,
    secret: String,
    pending: Mutex<Pending>,
    factories: Mutex<Vec<Arc<dyn ChatHandlerFactory>>>,
}

impl ChatService {
    pub fn new(chats: ChatStore, secret: impl Into<String>) -> Self {
        Self {
            chats,
            secret: secret.into(),
            pending: Mutex::new(Pending::new()),
            factories: Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler factory. Order of registration determines
    /// the order factories are invoked in on bind and on startup
    /// replay.
    pub async fn register_factory(&self, factory: Arc<dyn ChatHandlerFactory>) {
        self.factories.lock().await.push(factory);
    }

    /// Records `xp_room` as pending for `tg_chat_id`. Issuing the
    /// command twice from the same TG chat overwrites the previous
    /// pending room rather than accumulating stale entries.
    pub async fn pending(&self, xp_room: impl Into<String>, tg_chat_id: i64) {
        let xp_room = xp_room.into();
        let mut pending = self.pending.lock().await;

        if let Some(old_room) = pending.by_chat.remove(&tg_chat_id) {
            pending.by_room.remove(&old_room);
        }
        pending.by_room.insert(xp_room.clone(), tg_chat_id);
        pending.by_chat.insert(tg_chat_id, xp_room);
    }

    /// Confirms a pairing if `xp_room` has a pending entry and
    /// `supplied_key` matches the configured secret. A mismatch on
    /// either condition is a silent, logged no-op — the pending entry
    /// is left untouched so a corrected invitation can still succeed.
    pub async fn bind(&self, xp_room: &str, supplied_key: &str) {
        if supplied_key != self.secret {
            warn!(xp_room, "bind rejected: handshake key mismatch");
            return;
        }

        let tg_chat_id = {
            let mut pending = self.pending.lock().await;
            match pending.by_room.remove(xp_room) {
                Some(tg_chat_id) => {
                    pending.by_chat.remove(&tg_chat_id);
                    tg_chat_id
                }
                None => {
                    warn!(xp_room, "bind rejected: no pending entry for room");
                    return;
                }
            }
        };

        if let Err(error) = self.chats.add(tg_chat_id, xp_room).await {
            warn!(%error, tg_chat_id, xp_room, "failed to persist confirmed pairing");
        }

        self.create_handlers(tg_chat_id, xp_room).await;
        info!(tg_chat_id, xp_room, "pairing bound");
    }

    /// Replays every persisted pairing through every registered
    /// factory. Called once at startup.
    pub async fn load_chats(&self) {
        let pairs = match self.chats.all().await {
            Ok(pairs) => pairs,
            Err(error) => {
                warn!(%error, "failed to load persisted pairings");
                return;
            }
        };

        for (tg_chat_id, xp_room) in pairs {
            self.create_handlers(tg_chat_id, &xp_room).await;
        }
    }

    async fn create_handlers(&self, tg_chat_id: i64, xp_room: &str) {
        let factories = self.factories.lock().await;
        for factory in factories.iter() {
            factory.create_handler(tg_chat_id, xp_room).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory(Arc<AtomicUsize>);

    #[async_trait]
    impl ChatHandlerFactory for CountingFactory {
        async fn create_handler(&self, _tg_chat_id: i64, _xp_room: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn chats() -> ChatStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = ChatStore::new(pool);
        store.create().await.unwrap();
        store
    }

    #[tokio::test]
    async fn bind_rejects_wrong_key() {
        let service = ChatService::new(chats().await, "s3cr3t");
        service.pending("room@conf.example.org", -1).await;
        service.bind("room@conf.example.org", "wrong").await;

        assert!(service.chats.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bind_rejects_unknown_room() {
        let service = ChatService::new(chats().await, "s3cr3t");
        service.bind("room@conf.example.org", "s3cr3t").await;

        assert!(service.chats.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bind_persists_pairing_and_invokes_every_factory() {
        let service = ChatService::new(chats().await, "s3cr3t");
        let calls = Arc::new(AtomicUsize::new(0));
        service
            .register_factory(Arc::new(CountingFactory(calls.clone())))
            .await;
        service
            .register_factory(Arc::new(CountingFactory(calls.clone())))
            .await;

        service.pending("room@conf.example.org", -100123).await;
        service.bind("room@conf.example.org", "s3cr3t").await;

        assert_eq!(
            service.chats.all().await.unwrap(),
            vec![(-100123, "room@conf.example.org".to_string())]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reissuing_pending_overwrites_previous_room() {
        let service = ChatService::new(chats().await, "s3cr3t");
        service.pending("first@conf.example.org", -1).await;
        service.pending("second@conf.example.org", -1).await;

        // The first room is no longer pending.
        service.bind("first@conf.example.org", "s3cr3t").await;
        assert!(service.chats.all().await.unwrap().is_empty());

        // The second, most recent room is.
        service.bind("second@conf.example.org", "s3cr3t").await;
        assert_eq!(
            service.chats.all().await.unwrap(),
            vec![(-1, "second@conf.example.org".to_string())]
        );
    }

    #[tokio::test]
    async fn load_chats_replays_every_persisted_pairing() {
        let chats = chats().await;
        chats.add(-1, "a@conf.example.org").await.unwrap();
        chats.add(-2, "b@conf.example.org").await.unwrap();

        let service = ChatService::new(chats, "s3cr3t");
        let calls = Arc::new(AtomicUsize::new(0));
        service
            .register_factory(Arc::new(CountingFactory(calls.clone())))
            .await;

        service.load_chats().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
