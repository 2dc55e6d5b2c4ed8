//! `chats` table: confirmed bridge pairings.

use sqlx::SqlitePool;
use tracing::error;

use crate::error::{StorageError, StorageResult};

/// `(telegram_id, muc)` — one pairing per `tg_chat_id`, one per
/// `xp_room`. Identity is the pair.
#[derive(Debug, Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent schema install.
    pub async fn create(&self) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chats (\
                telegram_id INTEGER NOT NULL, \
                muc TEXT NOT NULL, \
                UNIQUE(telegram_id), \
                UNIQUE(muc))",
        )
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, "failed to create chats table");
            StorageError::Schema(error.to_string())
        })?;

        Ok(())
    }

    /// Persists a confirmed pairing. Idempotent: re-adding the same
    /// `tg_chat_id` overwrites the paired room.
    pub async fn add(&self, tg_chat_id: i64, xp_room: &str) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO chats(telegram_id, muc) VALUES (?, ?) \
             ON CONFLICT(telegram_id) DO UPDATE SET muc = excluded.muc",
        )
        .bind(tg_chat_id)
        .bind(xp_room)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, tg_chat_id, "failed to add chat pairing");
            StorageError::Query(error.to_string())
        })?;

        Ok(())
    }

    /// Deletes a pairing by its TG chat id, used when `Unbridge` is
    /// processed.
    pub async fn remove(&self, tg_chat_id: i64) -> StorageResult<()> {
        sqlx::query("DELETE FROM chats WHERE telegram_id = ?")
            .bind(tg_chat_id)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                error!(%error, tg_chat_id, "failed to remove chat pairing");
                StorageError::Query(error.to_string())
            })?;

        Ok(())
    }

    /// Finds the pairing this address belongs to, whichever side it
    /// is on: a TG chat id or an XP room. Used by `Unbridge` handling
    /// to recover the *other* side's address so both directions can be
    /// removed from the dispatcher's handler map.
    pub async fn pair_for(&self, address: &str) -> StorageResult<Option<(i64, String)>> {
        let as_telegram_id: i64 = address.parse().unwrap_or(i64::MIN);

        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT telegram_id, muc FROM chats WHERE telegram_id = ? OR muc = ?",
        )
        .bind(as_telegram_id)
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, address, "failed to find chat pairing");
            StorageError::Query(error.to_string())
        })?;

        Ok(row)
    }

    /// All persisted pairings, used by the chat service to replay
    /// `create_handler` across every factory at startup.
    pub async fn all(&self) -> StorageResult<Vec<(i64, String)>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT telegram_id, muc FROM chats")
                .fetch_all(&self.pool)
                .await
                .map_err(|error| {
                    error!(%error, "failed to list chat pairings");
                    StorageError::Query(error.to_string())
                })?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = ChatStore::new(pool().await);
        store.create().await.unwrap();
        store.create().await.unwrap();
    }

    #[tokio::test]
    async fn add_then_all_round_trips() {
        let store = ChatStore::new(pool().await);
        store.create().await.unwrap();
        store.add(-100123, "room@conf.example.org").await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all, vec![(-100123, "room@conf.example.org".to_string())]);
    }

    #[tokio::test]
    async fn remove_deletes_pairing() {
        let store = ChatStore::new(pool().await);
        store.create().await.unwrap();
        store.add(-100123, "room@conf.example.org").await.unwrap();
        store.remove(-100123).await.unwrap();

        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pair_for_matches_either_side() {
        let store = ChatStore::new(pool().await);
        store.create().await.unwrap();
        store.add(-100123, "room@conf.example.org").await.unwrap();

        assert_eq!(
            store.pair_for("-100123").await.unwrap(),
            Some((-100123, "room@conf.example.org".to_string()))
        );
        assert_eq!(
            store.pair_for("room@conf.example.org").await.unwrap(),
            Some((-100123, "room@conf.example.org".to_string()))
        );
        assert_eq!(store.pair_for("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_overwrites_existing_chat_id() {
        let store = ChatStore::new(pool().await);
        store.create().await.unwrap();
        store.add(-1, "a@conf.example.org").await.unwrap();
        store.add(-1, "b@conf.example.org").await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all, vec![(-1, "b@conf.example.org".to_string())]);
    }
}
