//! Test plan for the `parley-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and the sanity clamps.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use parley_config::{load, AppConfig, BusBackendKind, EchoPolicy};

const ENV_VARS_TO_RESET: &[&str] = &[
    "PARLEY_CONFIG",
    "PARLEY__AUTH__JWT_SECRET",
    "PARLEY__AUTH__ISSUER",
    "PARLEY__BUS__BACKEND",
    "PARLEY__BUS__REDIS_URL",
    "PARLEY__DATABASE__MAX_CONNECTIONS",
    "PARLEY__DATABASE__URL",
    "PARLEY__DISPATCHER__MAX_ATTEMPTS",
    "PARLEY__GATEWAY__ECHO_POLICY",
    "PARLEY__GATEWAY__STORE_TIMEOUT_MS",
    "PARLEY__HTTP__ADDRESS",
    "PARLEY__HTTP__PORT",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        let mut ctx = Self {
            vars: Vec::new(),
            original_dir: None,
        };
        for key in ENV_VARS_TO_RESET {
            ctx.remove_var(key);
        }
        ctx
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(&path, contents).expect("failed to write config file");
    path
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.http.port, defaults.http.port);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(config.bus.backend, BusBackendKind::Memory);
    assert_eq!(config.gateway.echo_policy, EchoPolicy::SameConnection);
    assert_eq!(config.dispatcher.max_attempts, 3);
    assert_eq!(config.dispatcher.base_delay_ms, 1_000);
    assert_eq!(config.dispatcher.step_timeout_ms, 5_000);
    assert!(config.auth.issuer.is_none());
}

#[test]
#[serial]
fn load_discovers_config_file_in_working_directory() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    write_config_file(
        temp_dir.path(),
        "config/parley.toml",
        r#"
[http]
address = "0.0.0.0"
port = 9000

[bus]
backend = "redis"
redis_url = "redis://cache:6379"

[gateway]
echo_policy = "same_user"
"#,
    );
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration with file should load");

    assert_eq!(config.http.address, "0.0.0.0");
    assert_eq!(config.http.port, 9000);
    assert_eq!(config.bus.backend, BusBackendKind::Redis);
    assert_eq!(config.bus.redis_url, "redis://cache:6379");
    assert_eq!(config.gateway.echo_policy, EchoPolicy::SameUser);
    assert_eq!(config.gateway.bus_timeout_ms, 5_000);
}

#[test]
#[serial]
fn explicit_config_path_takes_precedence() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    write_config_file(temp_dir.path(), "parley.toml", "[http]\nport = 1111\n");
    let explicit = write_config_file(temp_dir.path(), "other/custom.toml", "[http]\nport = 2222\n");
    ctx.set_current_dir(temp_dir.path());
    ctx.set_var("PARLEY_CONFIG", explicit.to_string_lossy());

    let config = load().expect("explicit configuration should load");

    assert_eq!(config.http.port, 2222);
}

#[test]
#[serial]
fn environment_overrides_win_over_file_values() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    write_config_file(
        temp_dir.path(),
        "parley.toml",
        "[database]\nurl = \"sqlite://from-file.db\"\nmax_connections = 2\n",
    );
    ctx.set_current_dir(temp_dir.path());
    ctx.set_var("PARLEY__DATABASE__URL", "sqlite://from-env.db");
    ctx.set_var("PARLEY__AUTH__JWT_SECRET", "env-secret");

    let config = load().expect("configuration with overrides should load");

    assert_eq!(config.database.url, "sqlite://from-env.db");
    assert_eq!(config.database.max_connections, 2);
    assert_eq!(config.auth.jwt_secret, "env-secret");
}

#[test]
#[serial]
fn zero_attempts_are_clamped_to_one() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    write_config_file(
        temp_dir.path(),
        "parley.toml",
        "[dispatcher]\nmax_attempts = 0\n",
    );
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration should load");

    assert_eq!(config.dispatcher.max_attempts, 1);
}

#[test]
#[serial]
fn invalid_echo_policy_is_rejected() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    write_config_file(
        temp_dir.path(),
        "parley.toml",
        "[gateway]\necho_policy = \"everyone\"\n",
    );
    ctx.set_current_dir(temp_dir.path());

    assert!(load().is_err());
}
