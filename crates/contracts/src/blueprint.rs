//! ClusterBlueprint - Config Loader output
//!
//! Describes the whole cluster: public listener, worker pool, supervision,
//! dispatch and broadcast transport. Every section is optional.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::{ContractError, RestartPolicy, TransferPolicy};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete cluster configuration blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ClusterBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Public listener
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Worker pool
    #[serde(default)]
    #[validate(nested)]
    pub workers: WorkerPoolConfig,

    /// Supervision policy
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Connection dispatch policy
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Cross-worker broadcast transport
    #[serde(default)]
    #[validate(nested)]
    pub broadcast: BroadcastConfig,
}

/// Public listening socket
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_server_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3000
}

/// Worker pool sizing and local binding
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerPoolConfig {
    /// Number of workers (None = available parallelism)
    #[serde(default)]
    #[validate(range(min = 1, max = 1024))]
    pub count: Option<usize>,

    /// Loopback address each worker binds its application server to
    #[serde(default = "default_local_host")]
    #[validate(length(min = 1))]
    pub local_host: String,

    /// Time given to workers to exit on shutdown before they are killed (milliseconds)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: None,
            local_host: default_local_host(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

/// Supervision settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Restart policy
    #[serde(default)]
    pub restart: RestartPolicy,
}

/// Dispatch settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Behavior when the target slot cannot take a connection
    #[serde(default)]
    pub transfer_policy: TransferPolicy,
}

/// Broadcast transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Redis pub/sub shared by all workers
    #[default]
    Redis,
    /// In-process bus, no cross-process delivery
    Local,
}

/// Broadcast transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BroadcastConfig {
    /// Transport kind
    #[serde(default)]
    pub transport: TransportKind,

    /// Transport host
    #[serde(default = "default_broadcast_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Transport port
    #[serde(default = "default_broadcast_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Topics attached eagerly at worker start
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Per-topic local buffer size
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1))]
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_broadcast_host(),
            port: default_broadcast_port(),
            topics: default_topics(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_broadcast_host() -> String {
    "localhost".to_string()
}

fn default_broadcast_port() -> u16 {
    6379
}

fn default_topics() -> Vec<String> {
    vec!["chat message".to_string()]
}

fn default_channel_capacity() -> usize {
    256
}

impl BroadcastConfig {
    /// Connection URL for the Redis transport. IPv6 literals are bracketed.
    pub fn redis_url(&self) -> String {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if host.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("redis://[{}]:{}/", host, self.port)
        } else {
            format!("redis://{}:{}/", host, self.port)
        }
    }
}

impl ClusterBlueprint {
    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        self.workers.count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Public listener address
    pub fn listen_addr(&self) -> Result<SocketAddr, ContractError> {
        parse_addr(&self.server.host, self.server.port, "server.host")
    }

    /// Worker application server address (ephemeral port)
    pub fn worker_local_addr(&self) -> Result<SocketAddr, ContractError> {
        parse_addr(&self.workers.local_host, 0, "workers.local_host")
    }

    /// Shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.workers.shutdown_grace_ms)
    }
}

fn parse_addr(host: &str, port: u16, field: &str) -> Result<SocketAddr, ContractError> {
    let ip = match host {
        "localhost" => std::net::Ipv4Addr::LOCALHOST.into(),
        other => other.parse().map_err(|e| {
            ContractError::config_validation(field, format!("invalid ip address '{other}': {e}"))
        })?,
    };
    Ok(SocketAddr::new(ip, port))
}
