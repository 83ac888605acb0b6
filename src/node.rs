use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::chain::{JobChainCoordinator, JobExecutionListener, JobLauncher};
use crate::config::{NodeConfig, PeerConfig};
use crate::error::{FleetError, Result};
use crate::host::{Host, HostDirectory};
use crate::jobstore::JobConfigStore;
use crate::loader::JobLoader;
use crate::partition::{PartitionReader, PartitionedReadAggregator};
use crate::placement::{CoordinationStore, InMemoryCoordinationStore, JobPlacementRegistry, WatchEvent};
use crate::sync::{HostTransport, HttpTransport, JobSyncService};
use crate::trigger::TriggerRegistry;
use crate::worker::JobExecutor;

/// One fleet host with all of its services wired together.
pub struct Node {
    pub config: NodeConfig,
    pub registry: Arc<JobPlacementRegistry>,
    pub directory: Arc<HostDirectory>,
    pub store: Arc<JobConfigStore>,
    pub triggers: Arc<TriggerRegistry>,
    pub executor: Arc<JobExecutor>,
    pub chains: Arc<JobChainCoordinator>,
    pub sync: Arc<JobSyncService>,
    pub loader: Arc<JobLoader>,
}

impl Node {
    /// Build a node backed by a process-local coordination store and the HTTP
    /// transport.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.transport_timeout())?);
        Ok(Self::with_services(
            config,
            Arc::new(InMemoryCoordinationStore::new()),
            transport,
        ))
    }

    /// Build a node on top of an existing coordination store and transport.
    /// Nodes sharing one store see each other's registrations and placements.
    pub fn with_services(
        config: NodeConfig,
        coordination: Arc<dyn CoordinationStore>,
        transport: Arc<dyn HostTransport>,
    ) -> Self {
        let registry = Arc::new(JobPlacementRegistry::new(coordination));
        let directory = Arc::new(HostDirectory::new(config.host.clone(), registry.clone()));
        let store = Arc::new(JobConfigStore::new(config.job_root.clone()));
        let triggers = Arc::new(TriggerRegistry::new());

        let executor = Arc::new(JobExecutor::new(store.clone()));
        let chains = Arc::new(JobChainCoordinator::new(executor.clone()));
        let listener: Arc<dyn JobExecutionListener> = chains.clone();
        executor.set_listener(&listener);

        let sync = Arc::new(JobSyncService::new(
            store.clone(),
            directory.clone(),
            registry.clone(),
            transport,
            &config.sync,
        ));
        let loader = Arc::new(JobLoader::new(
            store.clone(),
            directory.clone(),
            registry.clone(),
            triggers.clone(),
            chains.clone(),
        ));

        Self {
            config,
            registry,
            directory,
            store,
            triggers,
            executor,
            chains,
            sync,
            loader,
        }
    }

    pub fn api_state(&self) -> ApiState {
        let launcher: Arc<dyn JobLauncher> = self.executor.clone();
        ApiState {
            directory: self.directory.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            triggers: self.triggers.clone(),
            sync: self.sync.clone(),
            loader: self.loader.clone(),
            launcher,
        }
    }

    /// Aggregator for one partitioned job run, bounded by the configured
    /// read timeout.
    pub fn partition_aggregator<R: PartitionReader>(&self, reader: R) -> PartitionedReadAggregator<R> {
        PartitionedReadAggregator::with_timeout(reader, self.config.partition.read_timeout())
    }

    /// Aggregator for a run of `job_name` with every partition its
    /// definition declares already opened.
    pub async fn open_partitioned_run<R: PartitionReader>(
        &self,
        job_name: &str,
        reader: R,
    ) -> Result<PartitionedReadAggregator<R>> {
        let declaration = self
            .store
            .definition(job_name)
            .await?
            .and_then(|d| d.declaration(job_name).cloned())
            .ok_or_else(|| FleetError::JobNotFound(job_name.to_string()))?;

        let aggregator = self.partition_aggregator(reader);
        let partitions = declaration.partition_contexts()?;
        tracing::debug!(job = job_name, partitions = partitions.len(), "Opening partitioned run");
        for partition in partitions {
            aggregator.open(partition)?;
        }
        Ok(aggregator)
    }

    /// Register this host and the configured peers, then load every job
    /// already present in the job store. Returns how many jobs loaded.
    pub async fn start(&self) -> Result<usize> {
        let current = self.directory.current_host()?;
        self.registry.register_host(&current).await?;

        for peer in &self.config.peers {
            let host = peer_host(peer)?;
            self.registry.register_host(&host).await?;
        }

        let loaded = self.loader.load_all().await?;
        tracing::info!(
            host = %current,
            peers = self.config.peers.len(),
            jobs = loaded,
            "Node started"
        );
        Ok(loaded)
    }

    /// Serve the API until `shutdown` fires.
    ///
    /// Besides the API this runs the periodic fleet sync (when configured) and
    /// a placement change logger. On shutdown pending chain delays are cut short
    /// and the host deregisters itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the API listener cannot be bound. Background loops
    /// log their own errors.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if let Some(secs) = self.config.sync.interval_secs.filter(|s| *s > 0) {
            let sync = self.sync.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                Self::sync_loop(sync, Duration::from_secs(secs), token).await;
            });
        }

        match self.registry.watch_placements().await {
            Ok(mut watch) => {
                let token = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            event = watch.next() => match event {
                                Some(WatchEvent::Put { key, .. }) => {
                                    tracing::debug!(key = %key, "Placement recorded");
                                }
                                Some(WatchEvent::Delete { key }) => {
                                    tracing::debug!(key = %key, "Placement removed");
                                }
                                None => break,
                            },
                            _ = token.cancelled() => break,
                        }
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "Failed to watch placements"),
        }

        let chains = self.chains.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            chains.interrupt();
        });

        let served = run_api(self.config.listen_addr, self.api_state(), shutdown).await;

        if let Ok(current) = self.directory.current_host() {
            if let Err(e) = self.registry.deregister_host(&current).await {
                tracing::warn!(host = %current, error = %e, "Failed to deregister host");
            }
        }
        tracing::info!("Node stopped");

        served.map_err(FleetError::from)
    }

    /// Run `sync_all_hosts` every `period` until cancelled.
    async fn sync_loop(sync: Arc<JobSyncService>, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = sync.sync_all_hosts().await {
                        tracing::warn!(error = %e, "Periodic sync failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

/// Resolve a configured peer (`ip:port`) into a [`Host`].
pub fn peer_host(peer: &PeerConfig) -> Result<Host> {
    let addr: SocketAddr = peer.addr.parse().map_err(|e| {
        FleetError::Configuration(format!(
            "invalid address '{}' for peer {}: {}",
            peer.addr, peer.name, e
        ))
    })?;
    Ok(Host::new(peer.name.clone(), Some(addr.ip()), addr.port()))
}
