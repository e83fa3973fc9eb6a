//! Participant checks with a bounded wait.

use std::sync::Arc;
use std::time::Duration;

use parley_database::MembershipStore;
use tracing::debug;

use crate::types::{ChatError, ChatResult};

#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn MembershipStore>,
    timeout: Duration,
}

impl AccessControl {
    pub fn new(store: Arc<dyn MembershipStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// `Ok(false)` for non-members and unknown conversations alike. Store
    /// failures and timeouts are errors, never `false`.
    pub async fn is_participant(&self, user_id: &str, conversation_id: &str) -> ChatResult<bool> {
        let allowed = tokio::time::timeout(self.timeout, self.store.is_participant(user_id, conversation_id))
            .await
            .map_err(|_| ChatError::Timeout {
                operation: "membership check",
                after: self.timeout,
            })??;

        debug!(user = %user_id, conversation = %conversation_id, allowed, "membership checked");
        Ok(allowed)
    }

    pub async fn ensure_participant(&self, user_id: &str, conversation_id: &str) -> ChatResult<()> {
        if self.is_participant(user_id, conversation_id).await? {
            Ok(())
        } else {
            Err(ChatError::not_participant(conversation_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_database::{StoreError, StoreResult};

    struct FixedStore(StoreResult<bool>);

    #[async_trait]
    impl MembershipStore for FixedStore {
        async fn is_participant(&self, _user_id: &str, _conversation_id: &str) -> StoreResult<bool> {
            match &self.0 {
                Ok(value) => Ok(*value),
                Err(_) => Err(StoreError::Timeout(Duration::from_millis(1))),
            }
        }
    }

    struct SlowStore;

    #[async_trait]
    impl MembershipStore for SlowStore {
        async fn is_participant(&self, _user_id: &str, _conversation_id: &str) -> StoreResult<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    fn access(store: impl MembershipStore + 'static) -> AccessControl {
        AccessControl::new(Arc::new(store), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn members_pass_and_outsiders_are_refused() {
        assert!(access(FixedStore(Ok(true))).ensure_participant("u", "c").await.is_ok());

        let err = access(FixedStore(Ok(false))).ensure_participant("u", "c").await.unwrap_err();
        assert_eq!(err.code(), "not_participant");
    }

    #[tokio::test]
    async fn store_failures_are_not_false() {
        let err = access(FixedStore(Err(StoreError::Validation(String::new()))))
            .is_participant("u", "c")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let err = access(SlowStore).is_participant("u", "c").await.unwrap_err();
        assert!(matches!(err, ChatError::Timeout { .. }));
    }
}
