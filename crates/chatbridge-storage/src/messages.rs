//! `messages` table: cross-network message identity, the crux of
//! edit/reply resolution.

use chatbridge_core::text::body_digest;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::error::{StorageError, StorageResult};

/// `(telegram_id, stanza_id)` recovered for a given lookup key.
/// `telegram_id` and `stanza_id` are each unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageIdEntry {
    pub telegram_id: i64,
    pub stanza_id: String,
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (\
                telegram_id INTEGER UNIQUE NOT NULL, \
                stanza_id TEXT UNIQUE NOT NULL, \
                body TEXT NOT NULL, \
                chat_id INTEGER NOT NULL, \
                topic_id INTEGER, \
                muc TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, "failed to create messages table");
            StorageError::Schema(error.to_string())
        })?;

        Ok(())
    }

    /// Records a freshly forwarded message. `body` is hashed to a
    /// digest before being stored; the plaintext is never persisted.
    ///
    /// When either `telegram_id` or `stanza_id` already has a row (an
    /// edit of a message forwarded before), the existing row is
    /// updated in place rather than a second row being inserted —
    /// the latest edit wins and reply-by-body lookups never see a
    /// stale duplicate.
    pub async fn add(
        &self,
        chat_id: i64,
        topic_id: Option<i64>,
        body: &str,
        telegram_id: i64,
        muc: &str,
        stanza_id: &str,
    ) -> StorageResult<()> {
        let digest = body_digest(body);

        sqlx::query(
            "INSERT INTO messages(telegram_id, stanza_id, body, chat_id, topic_id, muc) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(telegram_id) DO UPDATE SET \
                stanza_id = excluded.stanza_id, body = excluded.body, \
                chat_id = excluded.chat_id, topic_id = excluded.topic_id, muc = excluded.muc \
             ON CONFLICT(stanza_id) DO UPDATE SET \
                telegram_id = excluded.telegram_id, body = excluded.body, \
                chat_id = excluded.chat_id, topic_id = excluded.topic_id, muc = excluded.muc",
        )
        .bind(telegram_id)
        .bind(stanza_id)
        .bind(digest)
        .bind(chat_id)
        .bind(topic_id)
        .bind(muc)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            error!(%error, "failed to insert message");
            StorageError::Query(error.to_string())
        })?;

        Ok(())
    }

    /// Looks up by `stanza_id` OR `telegram_id`, scoped to the pairing
    /// (and topic, when one is given). Used for edits: the origin id
    /// is mapped to the peer id.
    pub async fn get_by_id(
        &self,
        chat_id: i64,
        topic_id: Option<i64>,
        muc: &str,
        message_id: &str,
    ) -> StorageResult<Option<MessageIdEntry>> {
        // message_id may be either a stanza id (opaque string) or a
        // telegram id (numeric); only the latter can match the
        // INTEGER column, so a non-numeric message_id simply never
        // matches telegram_id.
        let as_telegram_id: i64 = message_id.parse().unwrap_or(i64::MIN);

        let row: Option<(i64, String)> = if let Some(topic_id) = topic_id {
            sqlx::query_as(
                "SELECT telegram_id, stanza_id FROM messages WHERE \
                 chat_id = ? AND muc = ? AND (stanza_id = ? OR telegram_id = ?) AND topic_id = ?",
            )
            .bind(chat_id)
            .bind(muc)
            .bind(message_id)
            .bind(as_telegram_id)
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query_as(
                "SELECT telegram_id, stanza_id FROM messages WHERE \
                 chat_id = ? AND muc = ? AND (stanza_id = ? OR telegram_id = ?)",
            )
            .bind(chat_id)
            .bind(muc)
            .bind(message_id)
            .bind(as_telegram_id)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(|error| {
            error!(%error, "failed to get message by id");
            StorageError::Query(error.to_string())
        })?;

        match row {
            Some((telegram_id, stanza_id)) => Ok(Some(MessageIdEntry {
                telegram_id,
                stanza_id,
            })),
            None => {
                info!(message_id, "cache miss for message id");
                Ok(None)
            }
        }
    }

    /// Looks up by the digest of `body`, scoped to the pairing. Used
    /// for replies: when a user quotes a line, the bridge recovers the
    /// peer-network id of the quoted message.
    pub async fn get_by_body(
        &self,
        chat_id: i64,
        topic_id: Option<i64>,
        muc: &str,
        body: &str,
    ) -> StorageResult<Option<MessageIdEntry>> {
        let digest = body_digest(body);

        let row: Option<(i64, String)> = if let Some(topic_id) = topic_id {
            sqlx::query_as(
                "SELECT telegram_id, stanza_id FROM messages WHERE \
                 chat_id = ? AND muc = ? AND body = ? AND topic_id = ?",
            )
            .bind(chat_id)
            .bind(muc)
            .bind(digest)
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query_as(
                "SELECT telegram_id, stanza_id FROM messages WHERE \
                 chat_id = ? AND muc = ? AND body = ?",
            )
            .bind(chat_id)
            .bind(muc)
            .bind(digest)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(|error| {
            error!(%error, "failed to get message by body");
            StorageError::Query(error.to_string())
        })?;

        match row {
            Some((telegram_id, stanza_id)) => Ok(Some(MessageIdEntry {
                telegram_id,
                stanza_id,
            })),
            None => {
                info!("cache miss for message body digest");
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
    async fn get_by_id_matches_telegram_id() {
        let store = MessageStore::new(pool().await);
        store.create().await.unwrap();
        store
            .add(-1, None, "hi", 42, "room@conf.example.org", "stanza-1")
            .await
            .unwrap();

        let entry = store
            .get_by_id(-1, None, "room@conf.example.org", "42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.telegram_id, 42);
        assert_eq!(entry.stanza_id, "stanza-1");
    }

    #[tokio::test]
    async fn get_by_id_matches_stanza_id() {
        let store = MessageStore::new(pool().await);
        store.create().await.unwrap();
        store
            .add(-1, None, "hi", 42, "room@conf.example.org", "stanza-1")
            .await
            .unwrap();

        let entry = store
            .get_by_id(-1, None, "room@conf.example.org", "stanza-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.telegram_id, 42);
    }

    #[tokio::test]
    async fn get_by_body_matches_digest() {
        let store = MessageStore::new(pool().await);
        store.create().await.unwrap();
        store
            .add(-1, None, "hi", 42, "room@conf.example.org", "stanza-1")
            .await
            .unwrap();

        let entry = store
            .get_by_body(-1, None, "room@conf.example.org", "hi")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.telegram_id, 42);
    }

    #[tokio::test]
    async fn edit_updates_existing_row_in_place() {
        let store = MessageStore::new(pool().await);
        store.create().await.unwrap();
        store
            .add(-1, None, "hi", 42, "room@conf.example.org", "stanza-1")
            .await
            .unwrap();
        // Editing the same origin message: same telegram_id, new body
        // and a fresh stanza id the peer assigned to the edit.
        store
            .add(-1, None, "hi2", 42, "room@conf.example.org", "stanza-2")
            .await
            .unwrap();

        let by_body = store
            .get_by_body(-1, None, "room@conf.example.org", "hi")
            .await
            .unwrap();
        assert!(by_body.is_none(), "stale pre-edit body must not resolve");

        let by_new_body = store
            .get_by_body(-1, None, "room@conf.example.org", "hi2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_new_body.stanza_id, "stanza-2");
    }

    #[tokio::test]
    async fn get_by_id_scoped_to_topic() {
        let store = MessageStore::new(pool().await);
        store.create().await.unwrap();
        store
            .add(-1, Some(7), "hi", 42, "room@conf.example.org", "stanza-1")
            .await
            .unwrap();

        assert!(store
            .get_by_id(-1, Some(8), "room@conf.example.org", "42")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_by_id(-1, Some(7), "room@conf.example.org", "42")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn get_by_id_returns_none_on_miss() {
        let store = MessageStore::new(pool().await);
        store.create().await.unwrap();
        assert!(store
            .get_by_id(-1, None, "room@conf.example.org", "999")
            .await
            .unwrap()
            .is_none());
    }
}
