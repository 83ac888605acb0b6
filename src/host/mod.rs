//! Fleet membership.
//!
//! - [`Host`]: identity of one fleet member (name, ip, port)
//! - [`HostDirectory`]: the current host plus every host registered in the
//!   coordination store

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::HostConfig;
use crate::error::{FleetError, Result};
use crate::placement::JobPlacementRegistry;

fn loopback() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// A fleet member.
///
/// Equality, hashing and ordering only consider `name` and `port`; the same
/// host may be reachable under several addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default = "loopback")]
    pub ip: IpAddr,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, ip: Option<IpAddr>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip: ip.unwrap_or_else(loopback),
            port,
        }
    }

    /// Address used to reach this host's transport endpoints.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Stable key used in the coordination store.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.port.hash(state);
    }
}

impl PartialOrd for Host {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Host {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.name, self.port).cmp(&(&other.name, other.port))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr())
    }
}

/// Read-only view of who this process is and who else is in the fleet.
pub struct HostDirectory {
    config: HostConfig,
    registry: Arc<JobPlacementRegistry>,
}

impl HostDirectory {
    pub fn new(config: HostConfig, registry: Arc<JobPlacementRegistry>) -> Self {
        Self { config, registry }
    }

    /// The host representing this process.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Configuration`] if no port is configured.
    pub fn current_host(&self) -> Result<Host> {
        let port = self
            .config
            .port
            .ok_or_else(|| FleetError::Configuration("host port is not configured".into()))?;

        let name = self
            .config
            .name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "localhost".to_string());

        Ok(Host::new(name, self.config.ip, port))
    }

    /// Every host registered in the coordination store. Empty for a fleet of one
    /// that never registered itself.
    pub async fn all_hosts(&self) -> Result<BTreeSet<Host>> {
        self.registry.registered_hosts().await
    }

    /// All registered hosts except this one.
    pub async fn peers(&self) -> Result<BTreeSet<Host>> {
        let current = self.current_host()?;
        let mut hosts = self.all_hosts().await?;
        hosts.remove(&current);
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::InMemoryCoordinationStore;
    use std::collections::HashSet;

    fn directory(config: HostConfig) -> HostDirectory {
        let store = Arc::new(InMemoryCoordinationStore::new());
        HostDirectory::new(config, Arc::new(JobPlacementRegistry::new(store)))
    }

    #[test]
    fn hosts_equal_by_name_and_port_regardless_of_ip() {
        let a = Host::new("alpha", Some("10.0.0.1".parse().unwrap()), 8080);
        let b = Host::new("alpha", Some("192.168.1.7".parse().unwrap()), 8080);
        let c = Host::new("alpha", Some("10.0.0.1".parse().unwrap()), 8081);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Host> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn host_ip_defaults_to_loopback() {
        let host = Host::new("alpha", None, 9000);
        assert_eq!(host.addr().to_string(), "127.0.0.1:9000");
        assert_eq!(host.key(), "alpha:9000");
    }

    #[test]
    fn host_deserializes_without_ip() {
        let host: Host = serde_json::from_str(r#"{"name":"beta","port":8080}"#).unwrap();
        assert_eq!(host.ip, loopback());
    }

    #[test]
    fn current_host_requires_port() {
        let dir = directory(HostConfig {
            name: Some("alpha".into()),
            ..HostConfig::default()
        });
        assert!(matches!(
            dir.current_host(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn current_host_uses_configured_identity() {
        let dir = directory(HostConfig {
            name: Some("alpha".into()),
            ip: Some("10.0.0.1".parse().unwrap()),
            port: Some(8080),
        });
        let host = dir.current_host().unwrap();
        assert_eq!(host.name, "alpha");
        assert_eq!(host.addr().to_string(), "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn all_hosts_empty_for_fresh_store() {
        let dir = directory(HostConfig {
            port: Some(8080),
            ..HostConfig::default()
        });
        assert!(dir.all_hosts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peers_exclude_current_host() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let registry = Arc::new(JobPlacementRegistry::new(store));
        let dir = HostDirectory::new(
            HostConfig {
                name: Some("alpha".into()),
                ip: None,
                port: Some(8080),
            },
            registry.clone(),
        );
        registry
            .register_host(&Host::new("alpha", None, 8080))
            .await
            .unwrap();
        registry
            .register_host(&Host::new("beta", None, 8080))
            .await
            .unwrap();

        let peers: Vec<String> = dir
            .peers()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(peers, vec!["beta"]);
        assert_eq!(dir.all_hosts().await.unwrap().len(), 2);
    }
}
