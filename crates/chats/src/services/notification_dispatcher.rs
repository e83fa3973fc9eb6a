//! Background fan-out for messages persisted outside the live send flow.
//!
//! Jobs are queued on a bounded channel and each one runs as its own task:
//! publish the canonical message event to the conversation topic, then bump
//! the unread counter, each step bounded by `step_timeout`. Failed steps are
//! retried with exponential backoff
//! (`base_delay * 2^attempt`) up to `max_attempts` total attempts; steps that
//! already succeeded are not repeated. After the last attempt the job is
//! logged and dropped. The message itself is already committed.

use std::sync::Arc;
use std::time::Duration;

use parley_bus::{Bus, Origin, Topic};
use parley_config::DispatcherConfig;
use parley_database::Message;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::unread_counter::UnreadCounter;
use crate::types::{ChatError, ChatResult, MessageEvent, ServerEvent};

#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub message: Message,
    /// Kept so echo suppression still applies to the sender's sockets.
    pub origin: Option<Origin>,
    pub temp_id: Option<String>,
}

impl DispatchJob {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            origin: None,
            temp_id: None,
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_temp_id(mut self, temp_id: Option<String>) -> Self {
        self.temp_id = temp_id;
        self
    }
}

struct Delivery {
    bus: Bus,
    unread: Arc<dyn UnreadCounter>,
    max_attempts: u32,
    base_delay: Duration,
    step_timeout: Duration,
}

#[derive(Default)]
struct Progress {
    published: bool,
    counted: bool,
}

impl Delivery {
    async fn attempt(&self, job: &DispatchJob, progress: &mut Progress) -> ChatResult<()> {
        let conversation_id = &job.message.conversation_public_id;

        if !progress.published {
            let event = ServerEvent::ChatMessage(MessageEvent::from_message(&job.message, job.temp_id.clone()));
            let topic = Topic::conversation(conversation_id);
            let publish = self.bus.publish(&topic, job.origin.clone(), event.to_value()?);
            tokio::time::timeout(self.step_timeout, publish)
                .await
                .map_err(|_| ChatError::Timeout {
                    operation: "bus publish",
                    after: self.step_timeout,
                })??;
            progress.published = true;
        }

        if !progress.counted {
            tokio::time::timeout(self.step_timeout, self.unread.increment(conversation_id))
                .await
                .map_err(|_| ChatError::Timeout {
                    operation: "unread counter",
                    after: self.step_timeout,
                })??;
            progress.counted = true;
        }

        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn run(&self, job: DispatchJob) {
        let mut progress = Progress::default();
        let mut attempt = 0;

        loop {
            match self.attempt(&job, &mut progress).await {
                Ok(()) => {
                    debug!(
                        conversation = %job.message.conversation_public_id,
                        message = %job.message.public_id,
                        attempt,
                        "notification dispatched"
                    );
                    return;
                }
                Err(err) if attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        conversation = %job.message.conversation_public_id,
                        message = %job.message.public_id,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "notification failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        conversation = %job.message.conversation_public_id,
                        message = %job.message.public_id,
                        attempts = attempt + 1,
                        error = %err,
                        "notification dropped after final attempt"
                    );
                    return;
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::Sender<DispatchJob>,
    stop: Arc<Notify>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NotificationDispatcher {
    pub fn spawn(bus: Bus, unread: Arc<dyn UnreadCounter>, config: &DispatcherConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let delivery = Arc::new(Delivery {
            bus,
            unread,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            step_timeout: config.step_timeout(),
        });
        let stop = Arc::new(Notify::new());

        let worker = tokio::spawn(run_worker(receiver, delivery, Arc::clone(&stop)));
        info!(
            max_attempts = config.max_attempts,
            base_delay_ms = config.base_delay_ms,
            "notification dispatcher started"
        );

        Self {
            sender,
            stop,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Queue a job, waiting for room when the queue is full.
    pub async fn dispatch(&self, job: DispatchJob) -> ChatResult<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| ChatError::unavailable("notification dispatcher is stopped"))
    }

    /// Stop accepting jobs, then wait for queued and in-flight jobs to finish.
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        self.stop.notify_one();
        if let Err(err) = worker.await {
            error!(error = %err, "notification dispatcher worker failed");
        }
        info!("notification dispatcher drained");
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<DispatchJob>, delivery: Arc<Delivery>, stop: Arc<Notify>) {
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => {
                    let delivery = Arc::clone(&delivery);
                    in_flight.spawn(async move { delivery.run(job).await });
                }
                None => break,
            },
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = result {
                    error!(error = %err, "notification task panicked");
                }
            }
            _ = stop.notified() => break,
        }
    }

    receiver.close();
    while let Some(job) = receiver.recv().await {
        let delivery = Arc::clone(&delivery);
        in_flight.spawn(async move { delivery.run(job).await });
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "notification task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryUnreadCounter;
    use async_trait::async_trait;
    use parley_bus::{ConnectionId, EnvelopeReceiver};
    use parley_config::EchoPolicy;
    use parley_database::SenderSummary;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn message() -> Message {
        Message {
            id: 1,
            public_id: "m1".into(),
            conversation_id: 1,
            conversation_public_id: "c1".into(),
            sender: SenderSummary {
                id: "alice".into(),
                email: "alice@example.com".into(),
                first_name: "Alice".into(),
                last_name: String::new(),
                display_name: "Alice".into(),
            },
            content: "hi".into(),
            is_read: false,
            created_at: "2024-01-01T00:00:00.000000Z".into(),
        }
    }

    fn config(max_attempts: u32) -> DispatcherConfig {
        DispatcherConfig {
            max_attempts,
            base_delay_ms: 1_000,
            queue_capacity: 8,
            unread_ttl_seconds: 60,
            step_timeout_ms: 500,
        }
    }

    async fn listener(bus: &Bus, user: &str) -> EnvelopeReceiver {
        let (tx, rx) = mpsc::channel(8);
        bus.join(&Topic::conversation("c1"), ConnectionId::new(), user, tx).await;
        rx
    }

    /// Fails the first `failures` increments.
    struct FlakyCounter {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl UnreadCounter for FlakyCounter {
        async fn increment(&self, _conversation_id: &str) -> ChatResult<i64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ChatError::unavailable("cache down"))
            } else {
                Ok(1)
            }
        }

        async fn reset(&self, _conversation_id: &str) -> ChatResult<()> {
            Ok(())
        }

        async fn get(&self, _conversation_id: &str) -> ChatResult<i64> {
            Ok(0)
        }
    }

    /// Never answers an increment.
    struct StalledCounter {
        calls: AtomicU32,
    }

    #[async_trait]
    impl UnreadCounter for StalledCounter {
        async fn increment(&self, _conversation_id: &str) -> ChatResult<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn reset(&self, _conversation_id: &str) -> ChatResult<()> {
            Ok(())
        }

        async fn get(&self, _conversation_id: &str) -> ChatResult<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn dispatch_publishes_and_counts() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        let mut rx = listener(&bus, "bob").await;
        let unread = Arc::new(MemoryUnreadCounter::new(Duration::from_secs(60)));
        let dispatcher = NotificationDispatcher::spawn(bus, unread.clone(), &config(3));

        dispatcher
            .dispatch(DispatchJob::new(message()).with_origin(Origin::user("alice")))
            .await
            .unwrap();
        dispatcher.shutdown().await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["type"], "chat.message");
        assert_eq!(envelope.payload["message_id"], "m1");
        assert_eq!(unread.get("c1").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_steps_retry_without_republishing() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        let mut rx = listener(&bus, "bob").await;
        let counter = Arc::new(FlakyCounter {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let dispatcher = NotificationDispatcher::spawn(bus, counter.clone(), &config(3));

        let started = tokio::time::Instant::now();
        dispatcher.dispatch(DispatchJob::new(message())).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        let counter = Arc::new(FlakyCounter {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let dispatcher = NotificationDispatcher::spawn(bus, counter.clone(), &config(3));

        dispatcher.dispatch(DispatchJob::new(message())).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_counter_times_out_and_shutdown_drains() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        let counter = Arc::new(StalledCounter {
            calls: AtomicU32::new(0),
        });
        let dispatcher = NotificationDispatcher::spawn(bus, counter.clone(), &config(3));

        dispatcher.dispatch(DispatchJob::new(message())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(3600), dispatcher.shutdown())
            .await
            .expect("shutdown should drain once every attempt has timed out");

        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_refused() {
        let bus = Bus::in_memory(EchoPolicy::SameConnection, Duration::from_secs(1));
        let unread = Arc::new(MemoryUnreadCounter::new(Duration::from_secs(60)));
        let dispatcher = NotificationDispatcher::spawn(bus, unread, &config(3));

        dispatcher.shutdown().await;
        dispatcher.shutdown().await;

        let err = dispatcher.dispatch(DispatchJob::new(message())).await.unwrap_err();
        assert_eq!(err.code(), "unavailable");
    }
}
