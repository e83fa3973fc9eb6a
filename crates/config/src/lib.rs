use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "parley.toml",
    "config/parley.toml",
    "crates/config/parley.toml",
    "../parley.toml",
    "../config/parley.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub bus: BusConfig,
    pub gateway: GatewayConfig,
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://parley.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Bearer credential settings. Tokens are HS256 JWTs whose `sub` (or
/// `user_id`) claim carries the user's public id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default = "AuthConfig::default_leeway")]
    pub leeway_seconds: u64,
    #[serde(default = "AuthConfig::default_token_ttl")]
    pub token_ttl_seconds: u64,
}

impl AuthConfig {
    const fn default_leeway() -> u64 {
        30
    }

    const fn default_token_ttl() -> u64 {
        86_400
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            issuer: None,
            leeway_seconds: Self::default_leeway(),
            token_ttl_seconds: Self::default_token_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackendKind,
    #[serde(default = "BusConfig::default_redis_url")]
    pub redis_url: String,
    #[serde(default = "BusConfig::default_channel_prefix")]
    pub channel_prefix: String,
}

impl BusConfig {
    fn default_redis_url() -> String {
        "redis://127.0.0.1:6379".to_string()
    }

    fn default_channel_prefix() -> String {
        "parley:".to_string()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackendKind::default(),
            redis_url: Self::default_redis_url(),
            channel_prefix: Self::default_channel_prefix(),
        }
    }
}

/// Which local connections are skipped when an event is delivered back to
/// the process that originated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Skip only the connection that sent the message.
    #[default]
    SameConnection,
    /// Skip every connection authenticated as the sending user.
    SameUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub echo_policy: EchoPolicy,
    #[serde(default = "GatewayConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "GatewayConfig::default_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "GatewayConfig::default_timeout_ms")]
    pub bus_timeout_ms: u64,
    #[serde(default = "GatewayConfig::default_timeout_ms")]
    pub verifier_timeout_ms: u64,
}

impl GatewayConfig {
    const fn default_outbound_buffer() -> usize {
        256
    }

    const fn default_timeout_ms() -> u64 {
        5_000
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }

    pub fn verifier_timeout(&self) -> Duration {
        Duration::from_millis(self.verifier_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            echo_policy: EchoPolicy::default(),
            outbound_buffer: Self::default_outbound_buffer(),
            store_timeout_ms: Self::default_timeout_ms(),
            bus_timeout_ms: Self::default_timeout_ms(),
            verifier_timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Retry and queueing knobs for the notification dispatcher.
///
/// ```
/// use parley_config::DispatcherConfig;
///
/// let dispatcher = DispatcherConfig::default();
/// assert_eq!(dispatcher.max_attempts, 3);
/// assert_eq!(dispatcher.unread_ttl_seconds, 86_400);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "DispatcherConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "DispatcherConfig::default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "DispatcherConfig::default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "DispatcherConfig::default_unread_ttl")]
    pub unread_ttl_seconds: u64,
    /// Bound on each bus publish and counter update; an elapsed timeout
    /// counts as a failed attempt.
    #[serde(default = "DispatcherConfig::default_step_timeout")]
    pub step_timeout_ms: u64,
}

impl DispatcherConfig {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_base_delay() -> u64 {
        1_000
    }

    const fn default_queue_capacity() -> usize {
        1_024
    }

    const fn default_unread_ttl() -> u64 {
        86_400
    }

    const fn default_step_timeout() -> u64 {
        5_000
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn unread_ttl(&self) -> Duration {
        Duration::from_secs(self.unread_ttl_seconds)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay(),
            queue_capacity: Self::default_queue_capacity(),
            unread_ttl_seconds: Self::default_unread_ttl(),
            step_timeout_ms: Self::default_step_timeout(),
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use parley_config::load;
///
/// std::env::remove_var("PARLEY_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.jwt_secret", defaults.auth.jwt_secret.clone())?
        .set_default("auth.leeway_seconds", clamp_i64(defaults.auth.leeway_seconds))?
        .set_default(
            "auth.token_ttl_seconds",
            clamp_i64(defaults.auth.token_ttl_seconds),
        )?
        .set_default("bus.backend", "memory")?
        .set_default("bus.redis_url", defaults.bus.redis_url.clone())?
        .set_default("bus.channel_prefix", defaults.bus.channel_prefix.clone())?
        .set_default("gateway.echo_policy", "same_connection")?
        .set_default(
            "gateway.outbound_buffer",
            clamp_i64(defaults.gateway.outbound_buffer as u64),
        )?
        .set_default(
            "gateway.store_timeout_ms",
            clamp_i64(defaults.gateway.store_timeout_ms),
        )?
        .set_default(
            "gateway.bus_timeout_ms",
            clamp_i64(defaults.gateway.bus_timeout_ms),
        )?
        .set_default(
            "gateway.verifier_timeout_ms",
            clamp_i64(defaults.gateway.verifier_timeout_ms),
        )?
        .set_default(
            "dispatcher.max_attempts",
            i64::from(defaults.dispatcher.max_attempts),
        )?
        .set_default(
            "dispatcher.base_delay_ms",
            clamp_i64(defaults.dispatcher.base_delay_ms),
        )?
        .set_default(
            "dispatcher.queue_capacity",
            clamp_i64(defaults.dispatcher.queue_capacity as u64),
        )?
        .set_default(
            "dispatcher.unread_ttl_seconds",
            clamp_i64(defaults.dispatcher.unread_ttl_seconds),
        )?
        .set_default(
            "dispatcher.step_timeout_ms",
            clamp_i64(defaults.dispatcher.step_timeout_ms),
        )?;

    let environment_overrides = config::Environment::with_prefix("PARLEY").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("PARLEY_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via PARLEY_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.dispatcher.max_attempts == 0 {
        config.dispatcher.max_attempts = 1;
    }
    if config.gateway.outbound_buffer == 0 {
        config.gateway.outbound_buffer = 1;
    }
    if config.dispatcher.queue_capacity == 0 {
        config.dispatcher.queue_capacity = 1;
    }

    debug!(
        http = ?config.http,
        database = %config.database.url,
        bus = ?config.bus.backend,
        echo_policy = ?config.gateway.echo_policy,
        "loaded backend configuration"
    );
    Ok(config)
}
