//! Embedded SQL persistence.
//!
//! A single `sqlx` SQLite pool backs four table wrappers: [`ChatStore`]
//! (bridge pairings), [`MessageStore`] (cross-network message
//! identity), [`StickerStore`] (reusable uploaded URLs), and
//! [`TopicStore`] (forum-topic display names). Every wrapper exposes
//! an idempotent `create()`, parameterised `add(...)`, and typed
//! lookups; failures are logged and folded into `Err`/`None` rather
//! than panicking.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod chats;
mod error;
mod messages;
mod stickers;
mod topics;

pub use chats::ChatStore;
pub use error::{StorageError, StorageResult};
pub use messages::{MessageIdEntry, MessageStore};
pub use stickers::StickerStore;
pub use topics::TopicStore;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

/// Opens the SQLite pool and installs the four table schemas in the
/// order the runner historically relied on: chats, stickers, topics,
/// then messages. Every `create()` call is idempotent; a failure in
/// any one of them aborts startup (the runner's fail-hard gate).
pub async fn open(database_path: &str) -> StorageResult<Storage> {
    let url = format!("sqlite://{database_path}?mode=rwc");
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .map_err(|error| StorageError::Connection(error.to_string()))?;

    let storage = Storage {
        chats: ChatStore::new(pool.clone()),
        stickers: StickerStore::new(pool.clone()),
        topics: TopicStore::new(pool.clone()),
        messages: MessageStore::new(pool),
    };

    storage.chats.create().await?;
    storage.stickers.create().await?;
    storage.topics.create().await?;
    storage.messages.create().await?;

    info!(database_path, "storage schema ready");
    Ok(storage)
}

/// Bundles the four table wrappers behind one handle, shareable
/// across tasks (each wrapper clones its own `SqlitePool`, which is
/// cheap — it is an `Arc` internally).
#[derive(Clone)]
pub struct Storage {
    pub chats: ChatStore,
    pub messages: MessageStore,
    pub stickers: StickerStore,
    pub topics: TopicStore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_all_four_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.db");
        let storage = open(path.to_str().unwrap()).await.unwrap();

        storage.chats.add(-1, "room@conf.example.org").await.unwrap();
        assert_eq!(storage.chats.all().await.unwrap().len(), 1);
    }
}
