//! `stickers` table: reusable uploaded XP URL per origin `file_id`.

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct StickerStore {
    pool: SqlitePool,
}

impl StickerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stickers (\
                file_id TEXT PRIMARY KEY, \
                xmpp_url TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, "failed to create stickers table");
            StorageError::Schema(error.to_string())
        })?;

        Ok(())
    }

    /// Inserts, or on conflict overwrites, the URL for `file_id`.
    pub async fn add(&self, file_id: &str, xmpp_url: &str) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO stickers(file_id, xmpp_url) VALUES (?, ?) \
             ON CONFLICT(file_id) DO UPDATE SET xmpp_url = excluded.xmpp_url",
        )
        .bind(file_id)
        .bind(xmpp_url)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, file_id, "failed to add sticker");
            StorageError::Query(error.to_string())
        })?;

        Ok(())
    }

    pub async fn get(&self, file_id: &str) -> StorageResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT xmpp_url FROM stickers WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| {
                    error!(%error, file_id, "failed to get sticker");
                    StorageError::Query(error.to_string())
                })?;

        match row {
            Some((url,)) => Ok(Some(url)),
            None => {
                info!(file_id, "cache miss for sticker");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = StickerStore::new(pool().await);
        store.create().await.unwrap();
        store.add("abc", "https://xp.example/u/abc.webp").await.unwrap();

        assert_eq!(
            store.get("abc").await.unwrap(),
            Some("https://xp.example/u/abc.webp".to_string())
        );
    }

    #[tokio::test]
    async fn get_returns_none_on_miss() {
        let store = StickerStore::new(pool().await);
        store.create().await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_overwrites_on_conflict() {
        let store = StickerStore::new(pool().await);
        store.create().await.unwrap();
        store.add("abc", "https://one").await.unwrap();
        store.add("abc", "https://two").await.unwrap();

        assert_eq!(store.get("abc").await.unwrap(), Some("https://two".to_string()));
    }
}
