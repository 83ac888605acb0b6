//! Test harness for in-process fleet integration tests.
//!
//! Hosts share one in-memory coordination store and talk through
//! [`LocalTransport`], which calls the target host's services directly and can
//! be told to fail.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use jobfleet::config::NodeConfig;
use jobfleet::error::{FleetError, Result};
use jobfleet::host::Host;
use jobfleet::jobstore::{JobDeclaration, JobDefinition};
use jobfleet::node::Node;
use jobfleet::placement::InMemoryCoordinationStore;
use jobfleet::sync::HostTransport;

/// Test node configuration with a short retry delay.
pub fn test_node_config(name: &str, addr: &str, job_root: &std::path::Path) -> NodeConfig {
    let mut config = NodeConfig::new(name, addr.parse().unwrap()).with_job_root(job_root);
    config.sync.retry_delay_ms = 10;
    config
}

/// Calls observed by [`LocalTransport`] for one target host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallCounts {
    pub definitions: usize,
    pub dependencies: usize,
    pub loads: usize,
}

/// In-process [`HostTransport`] with failure injection.
#[derive(Default)]
pub struct LocalTransport {
    nodes: Mutex<HashMap<String, Weak<Node>>>,
    calls: Mutex<HashMap<String, CallCounts>>,
    failing_definition_sends: Mutex<HashMap<String, u32>>,
    unreachable: Mutex<Vec<String>>,
}

impl LocalTransport {
    pub fn attach(&self, node: &Arc<Node>) {
        let host = node.directory.current_host().unwrap();
        self.nodes.lock().insert(host.key(), Arc::downgrade(node));
    }

    /// Fail the next `n` definition sends to `host`.
    pub fn fail_definition_sends(&self, host: &Host, n: u32) {
        self.failing_definition_sends.lock().insert(host.key(), n);
    }

    pub fn set_unreachable(&self, host: &Host, unreachable: bool) {
        let mut hosts = self.unreachable.lock();
        hosts.retain(|h| h != &host.key());
        if unreachable {
            hosts.push(host.key());
        }
    }

    pub fn calls(&self, host: &Host) -> CallCounts {
        self.calls.lock().get(&host.key()).copied().unwrap_or_default()
    }

    /// Push attempts that reached `host` (one definition send per attempt).
    pub fn push_attempts(&self, host: &Host) -> usize {
        self.calls(host).definitions
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn node(&self, host: &Host) -> Result<Arc<Node>> {
        if self.unreachable.lock().contains(&host.key()) {
            return Err(FleetError::Transport(format!("{} is unreachable", host)));
        }
        self.nodes
            .lock()
            .get(&host.key())
            .and_then(Weak::upgrade)
            .ok_or_else(|| FleetError::Transport(format!("no route to {}", host)))
    }
}

#[async_trait]
impl HostTransport for LocalTransport {
    async fn send_definition(&self, target: &Host, job_name: &str, contents: Vec<u8>) -> Result<()> {
        self.calls.lock().entry(target.key()).or_default().definitions += 1;
        {
            let mut failing = self.failing_definition_sends.lock();
            if let Some(left) = failing.get_mut(&target.key()) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FleetError::Transport(format!(
                        "injected failure sending to {}",
                        target
                    )));
                }
            }
        }
        let node = self.node(target)?;
        node.store.write_definition(job_name, &contents).await
    }

    async fn send_dependency(
        &self,
        target: &Host,
        job_name: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<()> {
        self.calls.lock().entry(target.key()).or_default().dependencies += 1;
        let node = self.node(target)?;
        node.store.add_dependency(job_name, file_name, &contents).await
    }

    async fn load_job(&self, target: &Host, job_name: &str) -> Result<()> {
        self.calls.lock().entry(target.key()).or_default().loads += 1;
        let node = self.node(target)?;
        match node.loader.load_job(job_name).await {
            Ok(_) => Ok(()),
            Err(e @ (FleetError::Configuration(_) | FleetError::JobNotFound(_))) => {
                Err(FleetError::LoadRejected {
                    job: job_name.to_string(),
                    host: target.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn request_pull(&self, source: &Host, requester: &Host) -> Result<()> {
        let node = self.node(source)?;
        node.sync.deploy_all_jobs_to_host(requester).await?;
        Ok(())
    }

    async fn request_job_push(&self, source: &Host, job_name: &str, target: &Host) -> Result<()> {
        let node = self.node(source)?;
        node.sync.try_push_with_retry(job_name, target, None).await
    }
}

/// A fleet of in-process hosts sharing one coordination store.
pub struct TestFleet {
    pub coordination: Arc<InMemoryCoordinationStore>,
    pub transport: Arc<LocalTransport>,
    pub nodes: Vec<Arc<Node>>,
    _dirs: Vec<TempDir>,
}

impl TestFleet {
    /// Start one host per `(name, ip:port)` pair.
    pub async fn new(hosts: &[(&str, &str)]) -> Self {
        let coordination = Arc::new(InMemoryCoordinationStore::new());
        let transport = Arc::new(LocalTransport::default());
        let mut nodes = Vec::new();
        let mut dirs = Vec::new();

        for (name, addr) in hosts {
            let dir = TempDir::new().unwrap();
            let node = Arc::new(Node::with_services(
                test_node_config(name, addr, dir.path()),
                coordination.clone(),
                transport.clone(),
            ));
            transport.attach(&node);
            node.start().await.unwrap();
            nodes.push(node);
            dirs.push(dir);
        }

        Self {
            coordination,
            transport,
            nodes,
            _dirs: dirs,
        }
    }

    pub fn node(&self, index: usize) -> &Arc<Node> {
        &self.nodes[index]
    }

    pub fn host(&self, index: usize) -> Host {
        self.nodes[index].directory.current_host().unwrap()
    }

    /// Store and load `declaration` on host `index`.
    pub async fn install_job(&self, index: usize, declaration: JobDeclaration) {
        let node = self.node(index);
        let name = declaration.name.clone();
        let bytes = JobDefinition::single(declaration).to_bytes().unwrap();
        node.store.write_definition(&name, &bytes).await.unwrap();
        node.loader.load_job(&name).await.unwrap();
    }

    /// Whether host `index` has `job` both on disk and in the registry.
    pub async fn has_job(&self, index: usize, job: &str) -> bool {
        let node = self.node(index);
        let on_disk = node.store.read_definition(job).await.unwrap().is_some();
        let placed = node
            .registry
            .hosts_for_job(job)
            .await
            .unwrap()
            .contains(&self.host(index));
        on_disk && placed
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
