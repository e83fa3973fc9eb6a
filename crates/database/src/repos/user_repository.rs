//! Repository for user lookups.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::clock::{new_public_id, timestamp_now};
use crate::entities::{CreateUserRequest, User};
use crate::store::UserDirectory;
use crate::types::{StoreError, StoreResult};

const USER_COLUMNS: &str =
    "id, public_id, email, first_name, last_name, display_name, created_at";

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        display_name: row.try_get("display_name")?,
        created_at: row.try_get("created_at")?,
    })
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user. Accounts normally come from the identity provider; this
    /// exists for seeding and tests.
    pub async fn create(&self, request: &CreateUserRequest) -> StoreResult<User> {
        let email = request.email.trim();
        if email.is_empty() {
            return Err(StoreError::Validation("email must not be empty".into()));
        }

        let public_id = new_public_id();
        let now = timestamp_now();

        let result = sqlx::query(
            "INSERT INTO users (public_id, email, first_name, last_name, display_name, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&public_id)
        .bind(email)
        .bind(request.first_name.trim())
        .bind(request.last_name.trim())
        .bind(request.display_name.as_deref())
        .bind(&now)
        .execute(&self.pool)
        .await?;

        info!(user = %public_id, "created user");

        Ok(User {
            id: result.last_insert_rowid(),
            public_id,
            email: email.to_string(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            display_name: request.display_name.clone(),
            created_at: now,
        })
    }

    pub async fn find_by_public_id(&self, public_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE public_id = ?"
        ))
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    pub async fn list(&self, limit: i64) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_user(&self, public_id: &str) -> StoreResult<Option<User>> {
        self.find_by_public_id(public_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn test_create_and_find_user() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);

        let created = repo
            .create(&CreateUserRequest {
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                display_name: None,
            })
            .await
            .unwrap();

        let found = repo.find_by_public_id(&created.public_id).await.unwrap();
        assert_eq!(found, Some(created.clone()));
        assert_eq!(repo.find_by_email("ada@example.com").await.unwrap(), Some(created));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_resolves_to_none() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);

        assert!(repo.find_user("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_email_is_rejected() {
        let (pool, _dir) = test_pool().await;
        let repo = UserRepository::new(pool);

        let err = repo
            .create(&CreateUserRequest {
                email: "  ".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
