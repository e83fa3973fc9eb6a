//! Repository for conversations and their participant sets.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::clock::timestamp_now;
use crate::entities::{Conversation, CreateConversationRequest};
use crate::store::MembershipStore;
use crate::types::{StoreError, StoreResult};

#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a conversation on behalf of `creator_id`.
    ///
    /// Participants keep the requested order with duplicates removed, and the
    /// creator is appended when missing. A conversation with more than one
    /// participant is always a group; a group without a name is called
    /// `Group N`.
    pub async fn create(
        &self,
        creator_id: &str,
        request: &CreateConversationRequest,
    ) -> StoreResult<Conversation> {
        let public_id = uuid::Uuid::new_v4().hyphenated().to_string();
        let now = timestamp_now();

        let mut tx = self.pool.begin().await?;

        // Insert first so the transaction holds the write lock from the start.
        let conversation_id = sqlx::query(
            "INSERT INTO conversations (public_id, name, is_group, created_at, updated_at)
             VALUES (?, NULL, 0, ?, ?)",
        )
        .bind(&public_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let mut requested: Vec<&str> = Vec::with_capacity(request.participant_ids.len() + 1);
        for id in request
            .participant_ids
            .iter()
            .map(|id| id.trim())
            .chain(std::iter::once(creator_id))
        {
            if !id.is_empty() && !requested.contains(&id) {
                requested.push(id);
            }
        }

        let mut participants = Vec::with_capacity(requested.len());
        for (position, participant) in requested.iter().enumerate() {
            let user_id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE public_id = ?")
                .bind(*participant)
                .fetch_optional(&mut *tx)
                .await?;
            let user_id = user_id.ok_or_else(|| StoreError::UserNotFound(participant.to_string()))?;

            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, position, joined_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(position as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            participants.push(participant.to_string());
        }

        let is_group = request.is_group.unwrap_or(false) || participants.len() > 1;
        let mut name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        if is_group && name.is_none() {
            let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
                .fetch_one(&mut *tx)
                .await?;
            name = Some(format!("Group {existing}"));
        }

        sqlx::query("UPDATE conversations SET name = ?, is_group = ? WHERE id = ?")
            .bind(name.as_deref())
            .bind(is_group)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            conversation = %public_id,
            participants = participants.len(),
            is_group,
            "created conversation"
        );

        Ok(Conversation {
            id: conversation_id,
            public_id,
            name,
            is_group,
            participants,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn find_by_public_id(&self, public_id: &str) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, public_id, name, is_group, created_at, updated_at
             FROM conversations WHERE public_id = ?",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    /// Conversations the user participates in, most recently active first.
    pub async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT c.id, c.public_id, c.name, c.is_group, c.created_at, c.updated_at
             FROM conversations c
             JOIN conversation_participants cp ON cp.conversation_id = c.id
             JOIN users u ON u.id = cp.user_id
             WHERE u.public_id = ?
             ORDER BY c.updated_at DESC, c.id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in &rows {
            conversations.push(self.hydrate(row).await?);
        }
        Ok(conversations)
    }

    /// Returns `true` when the user was newly added.
    pub async fn add_participant(&self, conversation_id: &str, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, position, joined_at)
             SELECT c.id, u.id,
                    COALESCE((SELECT MAX(position) + 1 FROM conversation_participants WHERE conversation_id = c.id), 0),
                    ?
             FROM conversations c, users u
             WHERE c.public_id = ? AND u.public_id = ?",
        )
        .bind(timestamp_now())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.ensure_exists(conversation_id, user_id).await?;
            return Ok(false);
        }

        debug!(conversation = %conversation_id, user = %user_id, "participant added");
        Ok(true)
    }

    /// Returns `true` when the user was a participant and has been removed.
    pub async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM conversation_participants
             WHERE conversation_id = (SELECT id FROM conversations WHERE public_id = ?)
               AND user_id = (SELECT id FROM users WHERE public_id = ?)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(conversation = %conversation_id, user = %user_id, "participant removed");
        }
        Ok(result.rows_affected() > 0)
    }

    async fn ensure_exists(&self, conversation_id: &str, user_id: &str) -> StoreResult<()> {
        let conversation: Option<i64> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE public_id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;
        if conversation.is_none() {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        }

        let user: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE public_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        if user.is_none() {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn hydrate(&self, row: &SqliteRow) -> StoreResult<Conversation> {
        let id: i64 = row.try_get("id")?;
        let participants: Vec<String> = sqlx::query_scalar(
            "SELECT u.public_id FROM conversation_participants cp
             JOIN users u ON u.id = cp.user_id
             WHERE cp.conversation_id = ?
             ORDER BY cp.position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Conversation {
            id,
            public_id: row.try_get("public_id")?,
            name: row.try_get("name")?,
            is_group: row.try_get("is_group")?,
            participants,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl MembershipStore for ConversationRepository {
    async fn is_participant(&self, user_id: &str, conversation_id: &str) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM conversation_participants cp
             JOIN conversations c ON c.id = cp.conversation_id
             JOIN users u ON u.id = cp.user_id
             WHERE c.public_id = ? AND u.public_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_user, test_pool};

    #[tokio::test]
    async fn test_create_includes_creator_and_dedupes() {
        let (pool, _dir) = test_pool().await;
        let a = seed_user(&pool, "a@example.com").await;
        let b = seed_user(&pool, "b@example.com").await;
        let repo = ConversationRepository::new(pool);

        let conversation = repo
            .create(
                &a.public_id,
                &CreateConversationRequest {
                    participant_ids: vec![b.public_id.clone(), b.public_id.clone()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(conversation.participants, vec![b.public_id.clone(), a.public_id.clone()]);
        assert!(conversation.is_group);
        assert_eq!(conversation.name.as_deref(), Some("Group 1"));

        let loaded = repo.find_by_public_id(&conversation.public_id).await.unwrap().unwrap();
        assert_eq!(loaded.participants, conversation.participants);
    }

    #[tokio::test]
    async fn test_single_participant_is_not_group_unless_requested() {
        let (pool, _dir) = test_pool().await;
        let a = seed_user(&pool, "a@example.com").await;
        let repo = ConversationRepository::new(pool);

        let solo = repo
            .create(&a.public_id, &CreateConversationRequest::default())
            .await
            .unwrap();
        assert!(!solo.is_group);
        assert!(solo.name.is_none());

        let forced = repo
            .create(
                &a.public_id,
                &CreateConversationRequest {
                    is_group: Some(true),
                    name: Some("Notes".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(forced.is_group);
        assert_eq!(forced.name.as_deref(), Some("Notes"));
    }

    #[tokio::test]
    async fn test_unknown_participant_rolls_back() {
        let (pool, _dir) = test_pool().await;
        let a = seed_user(&pool, "a@example.com").await;
        let repo = ConversationRepository::new(pool.clone());

        let err = repo
            .create(
                &a.public_id,
                &CreateConversationRequest {
                    participant_ids: vec!["ghost".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(ref id) if id == "ghost"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_is_participant_hides_missing_conversations() {
        let (pool, _dir) = test_pool().await;
        let a = seed_user(&pool, "a@example.com").await;
        let outsider = seed_user(&pool, "c@example.com").await;
        let repo = ConversationRepository::new(pool);
        let conversation = repo
            .create(&a.public_id, &CreateConversationRequest::default())
            .await
            .unwrap();

        assert!(repo.is_participant(&a.public_id, &conversation.public_id).await.unwrap());
        assert!(!repo.is_participant(&outsider.public_id, &conversation.public_id).await.unwrap());
        assert!(!repo.is_participant(&a.public_id, "00000000-0000-0000-0000-000000000000").await.unwrap());
        assert!(!repo.is_participant("ghost", &conversation.public_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_and_remove_participant() {
        let (pool, _dir) = test_pool().await;
        let a = seed_user(&pool, "a@example.com").await;
        let b = seed_user(&pool, "b@example.com").await;
        let repo = ConversationRepository::new(pool);
        let conversation = repo
            .create(&a.public_id, &CreateConversationRequest::default())
            .await
            .unwrap();

        assert!(repo.add_participant(&conversation.public_id, &b.public_id).await.unwrap());
        assert!(!repo.add_participant(&conversation.public_id, &b.public_id).await.unwrap());
        assert!(repo.is_participant(&b.public_id, &conversation.public_id).await.unwrap());

        let loaded = repo.find_by_public_id(&conversation.public_id).await.unwrap().unwrap();
        assert_eq!(loaded.participants, vec![a.public_id.clone(), b.public_id.clone()]);

        assert!(repo.remove_participant(&conversation.public_id, &b.public_id).await.unwrap());
        assert!(!repo.remove_participant(&conversation.public_id, &b.public_id).await.unwrap());
        assert!(!repo.is_participant(&b.public_id, &conversation.public_id).await.unwrap());

        let err = repo.add_participant("missing", &b.public_id).await.unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_for_user_orders_by_activity() {
        let (pool, _dir) = test_pool().await;
        let a = seed_user(&pool, "a@example.com").await;
        let repo = ConversationRepository::new(pool.clone());
        let first = repo
            .create(&a.public_id, &CreateConversationRequest::default())
            .await
            .unwrap();
        let second = repo
            .create(&a.public_id, &CreateConversationRequest::default())
            .await
            .unwrap();

        sqlx::query("UPDATE conversations SET updated_at = '2999-01-01T00:00:00.000000Z' WHERE public_id = ?")
            .bind(&first.public_id)
            .execute(&pool)
            .await
            .unwrap();

        let listed: Vec<_> = repo
            .list_for_user(&a.public_id)
            .await
            .unwrap()
            .into_iter()
            .map(|conversation| conversation.public_id)
            .collect();
        assert_eq!(listed, vec![first.public_id, second.public_id]);
    }
}
