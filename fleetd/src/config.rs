//! Environment-driven configuration (SPEC_FULL.md §4.11), shaped like
//! `hr_common::config::EnvConfig`'s `Default` + `from_env` pair, minus
//! the `.env`-file loader: this system's environment is provisioned by
//! its deployment, not a checked-in `.env`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub listen_addr: SocketAddr,
    /// `redis://...`; absent means run with `InMemoryBroker` (single
    /// process, suitable for development and tests).
    pub redis_url: Option<String>,
    pub sqlite_path: PathBuf,
    pub sessions_db_path: PathBuf,
    pub default_grace_period_secs: u64,
    pub cors_allowlist: Vec<String>,
    pub heartbeat_interval: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            redis_url: None,
            sqlite_path: PathBuf::from("/var/lib/fleetd/fleet.db"),
            sessions_db_path: PathBuf::from("/var/lib/fleetd/sessions.db"),
            default_grace_period_secs: 30,
            cors_allowlist: Vec::new(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("FLEETD_LISTEN_ADDR") {
            if let Ok(addr) = v.parse() {
                config.listen_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("FLEETD_REDIS_URL") {
            config.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("FLEETD_SQLITE_PATH") {
            config.sqlite_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FLEETD_SESSIONS_DB_PATH") {
            config.sessions_db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FLEETD_DEFAULT_GRACE_PERIOD_SECS") {
            if let Ok(secs) = v.parse() {
                config.default_grace_period_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("FLEETD_CORS_ALLOWLIST") {
            config.cors_allowlist = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("FLEETD_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                config.heartbeat_interval = Duration::from_secs(secs);
            }
        }

        config
    }
}
