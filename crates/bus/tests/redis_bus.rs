//! Cross-process fan-out through Redis. Needs a server at `PARLEY_TEST_REDIS_URL`
//! (default `redis://127.0.0.1:6379`); run with `--ignored`.

use std::time::Duration;

use parley_bus::{Bus, ConnectionId, Origin, Topic};
use parley_config::{BusBackendKind, BusConfig, EchoPolicy};
use serde_json::json;
use tokio::sync::mpsc;

fn redis_config() -> BusConfig {
    BusConfig {
        backend: BusBackendKind::Redis,
        redis_url: std::env::var("PARLEY_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        channel_prefix: format!("parley-test-{}:", uuid::Uuid::new_v4()),
    }
}

#[tokio::test]
#[ignore = "requires a running redis server"]
async fn events_cross_process_boundaries() {
    let config = redis_config();
    let timeout = Duration::from_secs(2);
    let sender_process = Bus::connect(&config, EchoPolicy::SameConnection, timeout).await.unwrap();
    let receiver_process = Bus::connect(&config, EchoPolicy::SameConnection, timeout).await.unwrap();

    let topic = Topic::conversation("c1");
    let (tx, mut rx) = mpsc::channel(8);
    receiver_process.join(&topic, ConnectionId::new(), "b", tx).await;

    // Give both pattern subscriptions time to register.
    tokio::time::sleep(Duration::from_millis(300)).await;

    sender_process
        .publish(&topic, Some(Origin::user("a")), json!({"type": "chat.message", "content": "hi"}))
        .await
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.payload["content"], "hi");

    sender_process.shutdown().await;
    receiver_process.shutdown().await;
}
