//! Parley Database Crate
//!
//! Connection management, migrations and the SQLite repositories behind the
//! messaging core: users, conversations with their participants, and messages.

use parley_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod clock;
pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{prepare_database, DatabaseConnection};
pub use migrations::run_migrations;

pub use repos::{ConversationLocks, ConversationRepository, MessageRepository, UserRepository};

pub use entities::{
    normalize_conversation_id, Conversation, CreateConversationRequest, CreateUserRequest,
    Message, SenderSummary, User,
};

pub use store::{MembershipStore, MessageStore, UserDirectory};

pub use types::{DatabaseError, DatabaseResult, StoreError, StoreResult};

/// Connect and bring the schema up to date.
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
