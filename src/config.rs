use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Identity of this process within the fleet.
///
/// The port is mandatory for a running host; it is optional here so that a
/// missing value surfaces as a configuration error when the host identity is
/// first needed rather than as a panic during argument parsing.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Logical host name. Falls back to `$HOSTNAME`, then `localhost`.
    pub name: Option<String>,
    /// Address peers use to reach this host. Defaults to loopback.
    pub ip: Option<IpAddr>,
    /// Port peers use to reach this host.
    pub port: Option<u16>,
}

/// Replication settings used by the sync service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Extra attempts made by retrying pushes after the first one fails.
    pub retry_count: u32,
    /// Base delay between retry attempts.
    pub retry_delay_ms: u64,
    /// Run a full fleet sync on this interval. `None` disables the loop.
    pub interval_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_count: 2,
            retry_delay_ms: 500,
            interval_secs: None,
        }
    }
}

impl SyncConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Settings for the partitioned read aggregator.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Upper bound on how long a drained reader waits for sibling partitions.
    pub read_timeout_ms: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 60_000,
        }
    }
}

impl PartitionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: HostConfig,
    pub listen_addr: SocketAddr,
    pub job_root: PathBuf,
    pub peers: Vec<PeerConfig>,
    pub sync: SyncConfig,
    pub partition: PartitionConfig,
    pub transport_timeout_ms: u64,
}

/// A statically known fleet member, seeded into the coordination store at startup.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub addr: String, // ip:port
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: HostConfig {
                port: Some(8080),
                ..HostConfig::default()
            },
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            job_root: PathBuf::from("jobs"),
            peers: Vec::new(),
            sync: SyncConfig::default(),
            partition: PartitionConfig::default(),
            transport_timeout_ms: 30_000,
        }
    }
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            host: HostConfig {
                name: Some(name.into()),
                ip: Some(listen_addr.ip()),
                port: Some(listen_addr.port()),
            },
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, name: impl Into<String>, addr: impl Into<String>) -> Self {
        self.peers.push(PeerConfig {
            name: name.into(),
            addr: addr.into(),
        });
        self
    }

    pub fn with_job_root(mut self, job_root: impl Into<PathBuf>) -> Self {
        self.job_root = job_root.into();
        self
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }
}
