use std::sync::Arc;

use anyhow::{Context, Result};
use parley_bus::Bus;
use parley_chats::{MemoryUnreadCounter, NotificationDispatcher, RedisUnreadCounter, UnreadCounter};
use parley_config::{AppConfig, BusBackendKind, BusConfig, DispatcherConfig};
use parley_database::initialize_database;
use parley_gateway::GatewayState;
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything the server needs, built once at start-up and torn down in
/// reverse order by [`BackendServices::shutdown`].
#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub bus: Bus,
    pub unread: Arc<dyn UnreadCounter>,
    pub dispatcher: NotificationDispatcher,
    pub gateway: Arc<GatewayState>,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let bus = connect_bus(config).await?;
        let unread = unread_counter(&config.bus, &config.dispatcher).await;
        let dispatcher = NotificationDispatcher::spawn(bus.clone(), Arc::clone(&unread), &config.dispatcher);

        let gateway = GatewayState::from_pool(
            db_pool.clone(),
            config,
            bus.clone(),
            Arc::clone(&unread),
            dispatcher.clone(),
        )
        .into_shared();

        info!(
            bus = bus.backend_name(),
            echo_policy = ?bus.echo_policy(),
            "backend services ready"
        );

        Ok(Self {
            db_pool,
            bus,
            unread,
            dispatcher,
            gateway,
        })
    }

    /// Drain queued notifications, then stop the bus and close the pool.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.bus.shutdown().await;
        self.db_pool.close().await;
        info!("backend services stopped");
    }
}

/// A Redis bus that cannot be reached falls back to the in-process bus so a
/// single instance still works.
async fn connect_bus(config: &AppConfig) -> Result<Bus> {
    let echo_policy = config.gateway.echo_policy;
    let timeout = config.gateway.bus_timeout();

    match Bus::connect(&config.bus, echo_policy, timeout).await {
        Ok(bus) => Ok(bus),
        Err(error) if config.bus.backend == BusBackendKind::Redis => {
            warn!(
                %error,
                url = %config.bus.redis_url,
                "failed to connect to redis bus, falling back to in-memory bus"
            );
            Ok(Bus::in_memory(echo_policy, timeout))
        }
        Err(error) => Err(error).context("failed to start bus"),
    }
}

async fn unread_counter(bus: &BusConfig, dispatcher: &DispatcherConfig) -> Arc<dyn UnreadCounter> {
    let ttl = dispatcher.unread_ttl();
    if bus.backend != BusBackendKind::Redis {
        return Arc::new(MemoryUnreadCounter::new(ttl));
    }

    let manager = match redis::Client::open(bus.redis_url.as_str()) {
        Ok(client) => ConnectionManager::new(client).await,
        Err(error) => Err(error),
    };

    match manager {
        Ok(manager) => {
            info!("unread counters stored in redis");
            Arc::new(RedisUnreadCounter::new(manager, ttl))
        }
        Err(error) => {
            warn!(%error, "failed to connect to redis, keeping unread counters in memory");
            Arc::new(MemoryUnreadCounter::new(ttl))
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
