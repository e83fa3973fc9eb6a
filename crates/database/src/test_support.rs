//! Helpers shared by the repository tests.

use parley_config::DatabaseConfig;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::entities::{CreateUserRequest, User};
use crate::repos::UserRepository;

/// A migrated database in a fresh temporary directory. Keep the directory
/// alive for as long as the pool is used.
pub(crate) async fn test_pool() -> (SqlitePool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", temp_dir.path().join("test.db").display()),
        max_connections: 5,
    };

    let pool = crate::initialize_database(&config).await.unwrap();
    (pool, temp_dir)
}

pub(crate) async fn seed_user(pool: &SqlitePool, email: &str) -> User {
    let (first_name, _) = email.split_once('@').unwrap_or((email, ""));
    UserRepository::new(pool.clone())
        .create(&CreateUserRequest {
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: "Tester".to_string(),
            display_name: None,
        })
        .await
        .unwrap()
}
