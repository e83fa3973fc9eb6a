//! Repository for chat messages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::clock::{format_timestamp, new_public_id, next_timestamp};
use crate::entities::{Message, User};
use crate::repos::user_repository::user_from_row;
use crate::store::MessageStore;
use crate::types::{StoreError, StoreResult};

const MESSAGE_SELECT: &str = "SELECT m.id AS message_id, m.public_id AS message_public_id,
        m.conversation_id, c.public_id AS conversation_public_id, m.content, m.is_read,
        m.created_at AS message_created_at,
        u.id, u.public_id, u.email, u.first_name, u.last_name, u.display_name, u.created_at
     FROM messages m
     JOIN conversations c ON c.id = m.conversation_id
     JOIN users u ON u.id = m.sender_id";

/// Async locks keyed by conversation id. Entries nobody holds or waits on
/// are pruned on the next acquire.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ConversationLocks {
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(conversation_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message, sqlx::Error> {
    let sender: User = user_from_row(row)?;
    Ok(Message {
        id: row.try_get("message_id")?,
        public_id: row.try_get("message_public_id")?,
        conversation_id: row.try_get("conversation_id")?,
        conversation_public_id: row.try_get("conversation_public_id")?,
        sender: sender.summary(),
        content: row.try_get("content")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("message_created_at")?,
    })
}

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
    locks: ConversationLocks,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: ConversationLocks::default(),
        }
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    pub async fn count_for_conversation(&self, conversation_id: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = (SELECT id FROM conversations WHERE public_id = ?)",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn persist(
        &self,
        sender_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> StoreResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::Validation("message content must not be empty".into()));
        }

        let _guard = self.locks.acquire(conversation_id).await;
        let mut tx = self.pool.begin().await?;

        // Write first: the transaction takes the database write lock before
        // any read, so its snapshot cannot go stale under other writers.
        let touched = sqlx::query("UPDATE conversations SET updated_at = updated_at WHERE public_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        }

        let conversation_pk: i64 = sqlx::query_scalar("SELECT id FROM conversations WHERE public_id = ?")
            .bind(conversation_id)
            .fetch_one(&mut *tx)
            .await?;

        let sender_row = sqlx::query(
            "SELECT id, public_id, email, first_name, last_name, display_name, created_at
             FROM users WHERE public_id = ?",
        )
        .bind(sender_id)
        .fetch_optional(&mut *tx)
        .await?;
        let sender = match sender_row {
            Some(row) => user_from_row(&row)?,
            None => return Err(StoreError::UserNotFound(sender_id.to_string())),
        };

        let participant: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_pk)
        .bind(sender.id)
        .fetch_optional(&mut *tx)
        .await?;
        if participant.is_none() {
            return Err(StoreError::NotParticipant {
                user: sender_id.to_string(),
                conversation: conversation_id.to_string(),
            });
        }

        let last: Option<String> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM messages WHERE conversation_id = ?")
                .bind(conversation_pk)
                .fetch_one(&mut *tx)
                .await?;
        let created_at = format_timestamp(next_timestamp(Utc::now(), last.as_deref()));
        let public_id = new_public_id();

        let id = sqlx::query(
            "INSERT INTO messages (public_id, conversation_id, sender_id, content, is_read, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&public_id)
        .bind(conversation_pk)
        .bind(sender.id)
        .bind(content)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&created_at)
            .bind(conversation_pk)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            conversation = %conversation_id,
            user = %sender_id,
            message = %public_id,
            "message persisted"
        );

        Ok(Message {
            id,
            public_id,
            conversation_id: conversation_pk,
            conversation_public_id: conversation_id.to_string(),
            sender: sender.summary(),
            content: content.to_string(),
            is_read: false,
            created_at,
        })
    }

    async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = (SELECT id FROM conversations WHERE public_id = ?)
               AND sender_id != (SELECT id FROM users WHERE public_id = ?)
               AND is_read = 0",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;

        debug!(
            conversation = %conversation_id,
            user = %reader_id,
            count = result.rows_affected(),
            "messages marked read"
        );
        Ok(result.rows_affected())
    }

    async fn find_message(&self, public_id: &str) -> StoreResult<Message> {
        let row = sqlx::query(&format!("{MESSAGE_SELECT} WHERE m.public_id = ?"))
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(message_from_row(&row)?),
            None => Err(StoreError::MessageNotFound(public_id.to_string())),
        }
    }

    async fn list_messages(&self, conversation_id: &str, limit: i64) -> StoreResult<Vec<Message>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT * FROM ({MESSAGE_SELECT}
                 WHERE c.public_id = ?
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?)
             ORDER BY message_created_at ASC, message_id ASC"
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}
