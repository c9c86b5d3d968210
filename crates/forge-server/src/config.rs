//! Configuration for the forge TCP server.
//!
//! Defaults can be overridden via environment variables, and the
//! environment in turn via CLI flags (CLI wins):
//!
//! - `FORGE_BIND_ADDR`      (default: "0.0.0.0")
//! - `FORGE_PORT`           (default: "7740")
//! - `FORGE_MAX_CLIENTS`    (default: "1024")
//! - `FORGE_REQUEST_QUEUE`  (default: "1024")
//! - `FORGE_WORK_QUEUE`     (default: "10")
//! - `FORGE_DEFERRED_QUEUE` (default: "32")
//! - `FORGE_BOOT_POLL_MS`   (default: "1000")

use std::env;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use forge_core::DispatcherConfig;

#[derive(Debug, Error)]
#[error("invalid value for {key}: {source}")]
pub struct ConfigError {
    key: &'static str,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

/// Command-line overrides. Anything left unset falls back to the
/// environment, then to the defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "forged", about = "Remote-control server for a single-threaded build engine")]
pub struct Cli {
    /// Address to bind
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of simultaneously connected clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Capacity of the inbound request queue
    #[arg(long)]
    pub request_queue: Option<usize>,

    /// Capacity of the raw work queue feeding the engine
    #[arg(long)]
    pub work_queue: Option<usize>,

    /// Capacity of the pre-boot deferred request buffer
    #[arg(long)]
    pub deferred_queue: Option<usize>,

    /// Boot poll interval in milliseconds
    #[arg(long)]
    pub boot_poll_ms: Option<u64>,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,

    /// Queue tunables handed to the dispatcher.
    pub dispatcher: DispatcherConfig,
}

impl Config {
    /// Construct a `Config` from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = DispatcherConfig::default();

        let bind_addr = env::var("FORGE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = read_env_or_default("FORGE_PORT", 7740u16)?;
        let max_clients = read_env_or_default("FORGE_MAX_CLIENTS", 1024usize)?;

        let dispatcher = DispatcherConfig {
            request_queue_capacity: read_env_or_default(
                "FORGE_REQUEST_QUEUE",
                defaults.request_queue_capacity,
            )?,
            work_raw_capacity: read_env_or_default("FORGE_WORK_QUEUE", defaults.work_raw_capacity)?,
            deferred_startup_capacity: read_env_or_default(
                "FORGE_DEFERRED_QUEUE",
                defaults.deferred_startup_capacity,
            )?,
            boot_poll_interval: Duration::from_millis(read_env_or_default(
                "FORGE_BOOT_POLL_MS",
                defaults.boot_poll_interval.as_millis() as u64,
            )?),
        };

        Ok(Config {
            bind_addr,
            port,
            max_clients,
            dispatcher,
        })
    }

    /// Environment first, then CLI flags on top. CLI wins.
    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        let mut config = Config::from_env()?;
        config.apply_cli(Cli::parse());
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: Cli) {
        if let Some(bind_addr) = cli.bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(max_clients) = cli.max_clients {
            self.max_clients = max_clients;
        }
        if let Some(capacity) = cli.request_queue {
            self.dispatcher.request_queue_capacity = capacity;
        }
        if let Some(capacity) = cli.work_queue {
            self.dispatcher.work_raw_capacity = capacity;
        }
        if let Some(capacity) = cli.deferred_queue {
            self.dispatcher.deferred_startup_capacity = capacity;
        }
        if let Some(millis) = cli.boot_poll_ms {
            self.dispatcher.boot_poll_interval = Duration::from_millis(millis);
        }
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn read_env_or_default<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(val) => val.parse::<T>().map_err(|err| ConfigError {
            key,
            source: Box::new(err),
        }),
        Err(_) => Ok(default),
    }
}
