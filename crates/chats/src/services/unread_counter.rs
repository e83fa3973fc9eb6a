//! Per-conversation unread counters kept in a cache with a TTL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::types::ChatResult;

pub fn unread_key(conversation_id: &str) -> String {
    format!("conversation_{conversation_id}_unread")
}

#[async_trait]
pub trait UnreadCounter: Send + Sync {
    /// Bump the counter and refresh its TTL; returns the new value.
    async fn increment(&self, conversation_id: &str) -> ChatResult<i64>;

    async fn reset(&self, conversation_id: &str) -> ChatResult<()>;

    async fn get(&self, conversation_id: &str) -> ChatResult<i64>;
}

/// Process-local counters for single-node deployments and tests.
pub struct MemoryUnreadCounter {
    ttl: Duration,
    entries: Mutex<HashMap<String, (i64, Instant)>>,
}

impl MemoryUnreadCounter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl UnreadCounter for MemoryUnreadCounter {
    async fn increment(&self, conversation_id: &str) -> ChatResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);

        let entry = entries.entry(unread_key(conversation_id)).or_insert((0, now));
        entry.0 += 1;
        entry.1 = now + self.ttl;
        Ok(entry.0)
    }

    async fn reset(&self, conversation_id: &str) -> ChatResult<()> {
        self.entries.lock().await.remove(&unread_key(conversation_id));
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> ChatResult<i64> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&unread_key(conversation_id))
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }
}

/// Counters shared by every process through Redis.
#[derive(Clone)]
pub struct RedisUnreadCounter {
    manager: ConnectionManager,
    ttl_seconds: i64,
}

impl RedisUnreadCounter {
    pub fn new(manager: ConnectionManager, ttl: Duration) -> Self {
        Self {
            manager,
            ttl_seconds: ttl.as_secs().clamp(1, i64::MAX as u64) as i64,
        }
    }
}

#[async_trait]
impl UnreadCounter for RedisUnreadCounter {
    async fn increment(&self, conversation_id: &str) -> ChatResult<i64> {
        let key = unread_key(conversation_id);
        let mut conn = self.manager.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, self.ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn reset(&self, conversation_id: &str) -> ChatResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(unread_key(conversation_id)).await?;
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> ChatResult<i64> {
        let mut conn = self.manager.clone();
        let count: Option<i64> = conn.get(unread_key(conversation_id)).await?;
        Ok(count.unwrap_or(0))
    }
}
