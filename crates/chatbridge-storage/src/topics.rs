//! `topics` table: human-readable names of forum-topic threads,
//! harvested once from `forum_topic_created` and cached thereafter.

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct TopicStore {
    pool: SqlitePool,
}

impl TopicStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS topics (\
                chat_id INTEGER NOT NULL, \
                topic_id INTEGER NOT NULL, \
                topic_name TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, "failed to create topics table");
            StorageError::Schema(error.to_string())
        })?;

        Ok(())
    }

    pub async fn add(&self, chat_id: i64, topic_id: i64, topic_name: &str) -> StorageResult<()> {
        sqlx::query("INSERT INTO topics(chat_id, topic_id, topic_name) VALUES (?, ?, ?)")
            .bind(chat_id)
            .bind(topic_id)
            .bind(topic_name)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                error!(%error, chat_id, topic_id, "failed to add topic name");
                StorageError::Query(error.to_string())
            })?;

        Ok(())
    }

    pub async fn get(&self, chat_id: i64, topic_id: i64) -> StorageResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT topic_name FROM topics WHERE chat_id = ? AND topic_id = ?",
        )
        .bind(chat_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, chat_id, topic_id, "failed to get topic name");
            StorageError::Query(error.to_string())
        })?;

        match row {
            Some((name,)) => Ok(Some(name)),
            None => {
                info!(chat_id, topic_id, "cache miss for topic name");
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
        let store = TopicStore::new(pool().await);
        store.create().await.unwrap();
        store.add(-1, 7, "General").await.unwrap();

        assert_eq!(store.get(-1, 7).await.unwrap(), Some("General".to_string()));
    }

    #[tokio::test]
    async fn get_returns_none_on_miss() {
        let store = TopicStore::new(pool().await);
        store.create().await.unwrap();
        assert_eq!(store.get(-1, 999).await.unwrap(), None);
    }
}
