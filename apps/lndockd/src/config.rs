use std::env;
use std::time::Duration;

use lndock_core::PoolConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub idle_timeout: Duration,
    pub max_sessions: usize,
    pub stats_interval: Duration,
    pub debug: bool,
    pub unsafe_log: bool,
    pub auth_token: String,
    pub dev_loopback: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("LNDOCK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("LNDOCK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7167),
            idle_timeout: duration_var("LNDOCK_TIMEOUT", Duration::from_secs(5 * 60)),
            max_sessions: env::var("LNDOCK_LIMIT_ACTIVE_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(210),
            stats_interval: duration_var("LNDOCK_STATS_INTERVAL", Duration::from_secs(60)),
            debug: bool_var("LNDOCK_DEBUG"),
            unsafe_log: bool_var("LNDOCK_DEV_UNSAFE_LOG"),
            auth_token: env::var("LNDOCK_AUTH_TOKEN").unwrap_or_default(),
            dev_loopback: bool_var("LNDOCK_DEV_LOOPBACK"),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_sessions: self.max_sessions,
            idle_timeout: self.idle_timeout,
            stats_interval: self.stats_interval,
            log_secrets: self.unsafe_log,
            ..PoolConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7167,
            idle_timeout: Duration::from_secs(5 * 60),
            max_sessions: 210,
            stats_interval: Duration::from_secs(60),
            debug: false,
            unsafe_log: false,
            auth_token: String::new(),
            dev_loopback: false,
        }
    }
}

fn duration_var(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| humantime::parse_duration(v.trim()).ok())
        .unwrap_or(default)
}

fn bool_var(key: &str) -> bool {
    env::var(key).map(|v| matches_truthy(&v)).unwrap_or(false)
}

fn matches_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
