use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::controller::ControllerSettings;
use crate::db::DbConfig;

/// Which store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown store '{other}', expected 'postgres' or 'memory'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub store: StoreKind,
    pub registry_url: String,
    pub http_timeout: Duration,
    pub controller: ControllerSettings,
    pub database: DbConfig,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or(name, default)
        .parse()
        .with_context(|| format!("invalid {name}"))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = parse_env("RDA_LISTEN_ADDR", "127.0.0.1:8080")?;

        let log_level = env_or("RDA_LOG_LEVEL", "info");

        let dev_mode = std::env::var("RDA_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let store = env_or("RDA_STORE", "postgres").parse()?;

        let registry_url = env_or("RDA_REGISTRY_URL", "http://127.0.0.1:9000");

        let http_timeout = Duration::from_secs(parse_env("RDA_HTTP_TIMEOUT_SECS", "30")?);

        let min_free_memory_percent: u8 = parse_env("RDA_MIN_FREE_MEMORY_PERCENT", "25")?;
        if min_free_memory_percent > 100 {
            bail!("RDA_MIN_FREE_MEMORY_PERCENT must be at most 100");
        }

        let controller = ControllerSettings {
            service_type: env_or("RDA_COMPUTE_SERVICE_TYPE", "rda-compute"),
            min_free_memory_percent,
            monitor_interval: Duration::from_millis(parse_env("RDA_MONITOR_INTERVAL_MS", "1000")?),
        };

        let database = DbConfig::from_env();

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            store,
            registry_url,
            http_timeout,
            controller,
            database,
        })
    }
}
