// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

/// Default upper bound for a background build.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Playground configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection options
    pub database: PgConnectOptions,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Base URL of the Caddy admin API
    pub caddy_admin_url: String,
    /// Directory holding one build context per app
    pub apps_base_dir: PathBuf,
    /// Cloud passed to the workbench features
    pub cloud: String,
    /// Name of the container this service runs in
    pub host_container: String,
    /// Docker network app containers join
    pub apps_network: String,
    /// Source directory of the workbench-tools devcontainer feature
    pub workbench_tools_feature_path: PathBuf,
    /// Explicit startup-script mount source; discovered from the host container when unset
    pub startup_script_source: Option<String>,
    /// Upper bound for a background build
    pub build_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Database: `DATABASE_URL`, or `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`.
    ///
    /// Optional (with defaults):
    /// - `PORT`: HTTP port (default: 8080)
    /// - `CADDY_HOST` / `CADDY_PORT`: Caddy admin endpoint (default: app:2019)
    /// - `APPS_BASE_DIR`: build context root (default: /workspace/apps)
    /// - `CLOUD`: cloud for workbench features (default: gcp)
    /// - `PLAYGROUND_CONTAINER`: host container name (default: playground)
    /// - `PLAYGROUND_NETWORK`: app network (default: playground_playground-apps)
    /// - `WORKBENCH_TOOLS_FEATURE_PATH`: feature source directory
    /// - `STARTUP_SCRIPT_SOURCE`: startup-script mount source (default: discovered)
    /// - `BUILD_TIMEOUT_SECS`: build upper bound (default: 1800)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = database_from_env()?;

        let port: u16 = var_or("PORT", "8080")
            .parse()
            .map_err(|_| ConfigError::Invalid("PORT", "must be a valid port number"))?;

        let caddy_host = var_or("CADDY_HOST", "app");
        let caddy_port: u16 = var_or("CADDY_PORT", "2019")
            .parse()
            .map_err(|_| ConfigError::Invalid("CADDY_PORT", "must be a valid port number"))?;

        let build_timeout_secs: u64 = var_or("BUILD_TIMEOUT_SECS", "1800")
            .parse()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::Invalid(
                "BUILD_TIMEOUT_SECS",
                "must be a positive integer",
            ))?;

        Ok(Self {
            database,
            http_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            caddy_admin_url: format!("http://{}:{}", caddy_host, caddy_port),
            apps_base_dir: PathBuf::from(var_or("APPS_BASE_DIR", "/workspace/apps")),
            cloud: var_or("CLOUD", "gcp"),
            host_container: var_or("PLAYGROUND_CONTAINER", "playground"),
            apps_network: var_or("PLAYGROUND_NETWORK", "playground_playground-apps"),
            workbench_tools_feature_path: PathBuf::from(var_or(
                "WORKBENCH_TOOLS_FEATURE_PATH",
                "/workspace/features/src/workbench-tools",
            )),
            startup_script_source: std::env::var("STARTUP_SCRIPT_SOURCE")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            build_timeout: Duration::from_secs(build_timeout_secs),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn database_from_env() -> Result<PgConnectOptions, ConfigError> {
    if let Ok(url) = std::env::var("DATABASE_URL")
        && !url.is_empty()
    {
        return PgConnectOptions::from_str(&url)
            .map_err(|_| ConfigError::Invalid("DATABASE_URL", "must be a valid postgres URL"));
    }

    let port: u16 = var_or("DB_PORT", "5432")
        .parse()
        .map_err(|_| ConfigError::Invalid("DB_PORT", "must be a valid port number"))?;

    Ok(PgConnectOptions::new()
        .host(&var_or("DB_HOST", "localhost"))
        .port(port)
        .database(&var_or("DB_NAME", "playground"))
        .username(&var_or("DB_USER", "playground"))
        .password(&std::env::var("DB_PASSWORD").unwrap_or_default()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that touch the process environment
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "DB_HOST",
        "DB_PORT",
        "DB_NAME",
        "DB_USER",
        "DB_PASSWORD",
        "PORT",
        "CADDY_HOST",
        "CADDY_PORT",
        "APPS_BASE_DIR",
        "CLOUD",
        "STARTUP_SCRIPT_SOURCE",
        "BUILD_TIMEOUT_SECS",
    ];

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn cleared() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: tests are serialized via ENV_MUTEX
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: tests are serialized via ENV_MUTEX
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::cleared();

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.caddy_admin_url, "http://app:2019");
        assert_eq!(config.apps_base_dir, PathBuf::from("/workspace/apps"));
        assert_eq!(config.cloud, "gcp");
        assert_eq!(config.host_container, "playground");
        assert_eq!(config.apps_network, "playground_playground-apps");
        assert!(config.startup_script_source.is_none());
        assert_eq!(config.build_timeout, DEFAULT_BUILD_TIMEOUT);
        assert_eq!(config.database.get_host(), "localhost");
        assert_eq!(config.database.get_port(), 5432);
    }

    #[test]
    fn test_config_database_parts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::cleared();
        guard.set("DB_HOST", "db");
        guard.set("DB_PORT", "6543");
        guard.set("DB_NAME", "apps");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database.get_host(), "db");
        assert_eq!(config.database.get_port(), 6543);
        assert_eq!(config.database.get_database(), Some("apps"));
    }

    #[test]
    fn test_config_database_url_wins() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::cleared();
        guard.set("DATABASE_URL", "postgres://u:p@pg.internal:5433/playground");
        guard.set("DB_HOST", "ignored");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database.get_host(), "pg.internal");
        assert_eq!(config.database.get_port(), 5433);
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::cleared();
        guard.set("PORT", "9090");
        guard.set("CADDY_HOST", "caddy");
        guard.set("CADDY_PORT", "2020");
        guard.set("BUILD_TIMEOUT_SECS", "60");
        guard.set("STARTUP_SCRIPT_SOURCE", "/srv/startup");

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 9090);
        assert_eq!(config.caddy_admin_url, "http://caddy:2020");
        assert_eq!(config.build_timeout, Duration::from_secs(60));
        assert_eq!(config.startup_script_source.as_deref(), Some("/srv/startup"));
    }

    #[test]
    fn test_config_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::cleared();
        guard.set("PORT", "not-a-port");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("PORT", _)));
    }

    #[test]
    fn test_config_zero_build_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::cleared();
        guard.set("BUILD_TIMEOUT_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("BUILD_TIMEOUT_SECS", _)));
    }
}
