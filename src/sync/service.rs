use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{FleetError, Result};
use crate::host::{Host, HostDirectory};
use crate::jobstore::JobConfigStore;
use crate::placement::JobPlacementRegistry;
use crate::sync::transport::HostTransport;

/// One job successfully placed on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRecord {
    pub job: String,
    pub host: Host,
}

/// One job that could not be placed on one host, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub job: String,
    pub host: Host,
    pub reason: String,
}

/// Per job/host outcome of a fan-out operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub pushed: Vec<PushRecord>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn record(&mut self, job: &str, host: &Host, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.pushed.push(PushRecord {
                job: job.to_string(),
                host: host.clone(),
            }),
            Err(e) => self.failures.push(SyncFailure {
                job: job.to_string(),
                host: host.clone(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn attempted(&self) -> usize {
        self.pushed.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Replicates job configuration between fleet hosts.
///
/// A push copies the definition and every dependency to the target and then
/// asks it to load the job; it only counts as successful when the load is
/// accepted. Fan-out operations attempt every host/job pair independently and
/// report each outcome.
pub struct JobSyncService {
    store: Arc<JobConfigStore>,
    directory: Arc<HostDirectory>,
    registry: Arc<JobPlacementRegistry>,
    transport: Arc<dyn HostTransport>,
    retry_count: u32,
    retry_delay: Duration,
    in_flight: Mutex<PairLocks>,
}

type PairLocks = HashMap<(String, Host), Arc<tokio::sync::Mutex<()>>>;

/// Held for the duration of one push. Dropping the last holder of a pair's
/// lock removes the pair from the map.
struct PairGuard<'a> {
    in_flight: &'a Mutex<PairLocks>,
    key: (String, Host),
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            in_flight.remove(&self.key);
        }
    }
}

impl JobSyncService {
    pub fn new(
        store: Arc<JobConfigStore>,
        directory: Arc<HostDirectory>,
        registry: Arc<JobPlacementRegistry>,
        transport: Arc<dyn HostTransport>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            transport,
            retry_count: config.retry_count,
            retry_delay: config.retry_delay(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize pushes of the same job to the same host.
    async fn lock_pair(&self, job_name: &str, target: &Host) -> PairGuard<'_> {
        let key = (job_name.to_string(), target.clone());
        let lock = self.in_flight.lock().entry(key.clone()).or_default().clone();
        PairGuard {
            in_flight: &self.in_flight,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// (job, host) pairs with a push running or waiting.
    pub fn in_flight_pairs(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Push `job_name` to `target`, returning the reason on failure.
    pub async fn try_push_job_to_host(&self, job_name: &str, target: &Host) -> Result<()> {
        let _pair = self.lock_pair(job_name, target).await;

        let definition = self
            .store
            .read_definition(job_name)
            .await?
            .ok_or_else(|| FleetError::JobNotFound(job_name.to_string()))?;

        for file_name in self.store.list_dependencies(job_name).await? {
            let bytes = self
                .store
                .read_dependency(job_name, &file_name)
                .await?
                .ok_or_else(|| {
                    FleetError::Internal(format!("dependency {} vanished during push", file_name))
                })?;
            self.transport
                .send_dependency(target, job_name, &file_name, bytes)
                .await?;
        }
        self.transport
            .send_definition(target, job_name, definition)
            .await?;
        self.transport.load_job(target, job_name).await?;

        if let Err(e) = self.registry.record_placement(job_name, target).await {
            tracing::warn!(job = job_name, host = %target, error = %e, "Pushed job but failed to record placement");
        }
        tracing::info!(job = job_name, host = %target, "Job pushed");
        Ok(())
    }

    /// Push `job_name` to `target`. Never fails; `false` means the job is not
    /// available on the target.
    pub async fn push_job_to_host(&self, job_name: &str, target: &Host) -> bool {
        match self.try_push_job_to_host(job_name, target).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job = job_name, host = %target, error = %e, "Job push failed");
                false
            }
        }
    }

    /// Push with up to `retry_count` extra attempts, pausing between them.
    /// Failures caused by bad input (unknown job, rejected definition) are
    /// not retried.
    pub async fn push_job_to_host_with_retry(
        &self,
        job_name: &str,
        target: &Host,
        retry_count: u32,
    ) -> bool {
        match self.try_push_with_retry(job_name, target, Some(retry_count)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job = job_name, host = %target, error = %e, "Job push failed");
                false
            }
        }
    }

    /// Retrying push that keeps the last failure. Uses the configured retry
    /// count when `retry_count` is `None`.
    pub async fn try_push_with_retry(
        &self,
        job_name: &str,
        target: &Host,
        retry_count: Option<u32>,
    ) -> Result<()> {
        let attempts = retry_count.unwrap_or(self.retry_count).saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.try_push_job_to_host(job_name, target).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_transient() => {
                    tracing::debug!(job = job_name, host = %target, attempt, error = %e, "Job push failed permanently");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    tracing::debug!(job = job_name, host = %target, attempts, "Job push failed after all attempts");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(job = job_name, host = %target, attempt, attempts, error = %e, "Job push attempt failed");
                }
            }
            attempt += 1;
            tokio::time::sleep(self.retry_backoff()).await;
        }
    }

    fn retry_backoff(&self) -> Duration {
        let base = self.retry_delay.as_millis() as u64;
        let jitter = if base >= 4 {
            rand::thread_rng().gen_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// Ask `source` to push all of its jobs to this host.
    pub async fn pull_request(&self, source: &Host) -> Result<()> {
        let current = self.directory.current_host()?;
        tracing::info!(source = %source, "Requesting pull");
        self.transport.request_pull(source, &current).await
    }

    /// Push `job_name` to every other host in the fleet.
    pub async fn deploy_job_to_all_hosts(&self, job_name: &str) -> Result<SyncReport> {
        let peers = self.directory.peers().await?;

        let outcomes = join_all(
            peers
                .iter()
                .map(|host| self.try_push_job_to_host(job_name, host)),
        )
        .await;

        let mut report = SyncReport::default();
        for (host, outcome) in peers.iter().zip(outcomes) {
            report.record(job_name, host, outcome);
        }
        log_report("deploy job", &report);
        Ok(report)
    }

    /// Push every job placed on this host to `target`.
    pub async fn deploy_all_jobs_to_host(&self, target: &Host) -> Result<SyncReport> {
        let current = self.directory.current_host()?;
        let jobs = self.registry.jobs_on_host(&current).await?;

        let outcomes = join_all(
            jobs.iter()
                .map(|job| self.try_push_job_to_host(job, target)),
        )
        .await;

        let mut report = SyncReport::default();
        for (job, outcome) in jobs.iter().zip(outcomes) {
            report.record(job, target, outcome);
        }
        log_report("deploy all jobs", &report);
        Ok(report)
    }

    /// Fill every gap in the fleet: each host receives every job known on any
    /// host that it does not have yet. Never removes anything, so running it
    /// again without intervening changes pushes nothing.
    ///
    /// Pushes from this host use the configured retry count. Gaps this host
    /// cannot fill are delegated to a host that has the job.
    pub async fn sync_all_hosts(&self) -> Result<SyncReport> {
        let current = self.directory.current_host()?;
        let hosts = self.directory.all_hosts().await?;
        let placements = self.registry.placements().await?;

        let mut plan = Vec::new();
        for target in &hosts {
            for (job, holders) in &placements {
                if holders.contains(target) {
                    continue;
                }
                let source = if holders.contains(&current) {
                    Some(&current)
                } else {
                    holders.iter().next()
                };
                if let Some(source) = source {
                    plan.push((job.as_str(), target, source));
                }
            }
        }

        let current = &current;
        let outcomes = join_all(plan.iter().map(|(job, target, source)| async move {
            if *source == current {
                self.try_push_with_retry(job, target, None).await
            } else {
                self.transport.request_job_push(source, job, target).await
            }
        }))
        .await;

        let mut report = SyncReport::default();
        for ((job, target, _), outcome) in plan.iter().zip(outcomes) {
            report.record(job, target, outcome);
        }
        log_report("sync all hosts", &report);
        Ok(report)
    }
}

fn log_report(operation: &str, report: &SyncReport) {
    for failure in &report.failures {
        tracing::warn!(
            operation,
            job = %failure.job,
            host = %failure.host,
            reason = %failure.reason,
            "Push failed"
        );
    }
    tracing::info!(
        operation,
        pushed = report.pushed.len(),
        failed = report.failures.len(),
        "Sync finished"
    );
}
