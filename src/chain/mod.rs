//! Job chaining: start downstream jobs when the job they follow completes.
//!
//! # Flow
//!
//! 1. The execution engine calls [`JobExecutionListener::after_job`] on the
//!    task that ran the completed job
//! 2. Every registered [`ChainTrigger`] whose `follow_job` matches
//!    (case-insensitive) is evaluated in registration order
//! 3. A positive `start_delay_ms` suspends that same task first; an
//!    interrupt cuts the delay short and the job starts immediately
//! 4. The downstream job is started through the [`JobLauncher`]
//!
//! A failed start is logged and does not stop the remaining triggers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Run `job_name` once `follow_job` completes, optionally after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTrigger {
    pub follow_job: String,
    pub start_delay_ms: i64,
    pub job_name: String,
}

impl ChainTrigger {
    pub fn new(follow_job: impl Into<String>, start_delay_ms: i64, job_name: impl Into<String>) -> Self {
        Self {
            follow_job: follow_job.into(),
            start_delay_ms,
            job_name: job_name.into(),
        }
    }

    pub fn follows(&self, completed_job: &str) -> bool {
        self.follow_job.eq_ignore_ascii_case(completed_job)
    }

    /// `None` when the job should start immediately.
    pub fn start_delay(&self) -> Option<Duration> {
        u64::try_from(self.start_delay_ms)
            .ok()
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}

/// Starts a job by name and returns once it is under way, without waiting
/// for it to finish. Implemented by the execution engine.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn run_job(&self, job_name: &str) -> Result<()>;
}

/// Lifecycle callbacks the execution engine issues around each job run.
#[async_trait]
pub trait JobExecutionListener: Send + Sync {
    async fn before_job(&self, job_name: &str);
    async fn after_job(&self, job_name: &str);
}

pub struct JobChainCoordinator {
    triggers: RwLock<Vec<ChainTrigger>>,
    launcher: Arc<dyn JobLauncher>,
    interrupt: CancellationToken,
}

impl JobChainCoordinator {
    pub fn new(launcher: Arc<dyn JobLauncher>) -> Self {
        Self {
            triggers: RwLock::new(Vec::new()),
            launcher,
            interrupt: CancellationToken::new(),
        }
    }

    /// Add a trigger. An identical trigger is only kept once.
    pub async fn register(&self, trigger: ChainTrigger) {
        let mut triggers = self.triggers.write().await;
        if !triggers.contains(&trigger) {
            tracing::debug!(
                job = %trigger.job_name,
                follows = %trigger.follow_job,
                delay_ms = trigger.start_delay_ms,
                "Chain trigger registered"
            );
            triggers.push(trigger);
        }
    }

    /// Drop every trigger that would start `job_name`.
    pub async fn remove_triggers_for(&self, job_name: &str) -> usize {
        let mut triggers = self.triggers.write().await;
        let before = triggers.len();
        triggers.retain(|t| t.job_name != job_name);
        before - triggers.len()
    }

    pub async fn triggers(&self) -> Vec<ChainTrigger> {
        self.triggers.read().await.clone()
    }

    /// Cut short every pending and future start delay.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    /// Start every job chained to `completed_job`. Returns how many started
    /// successfully.
    pub async fn on_job_completed(&self, completed_job: &str) -> usize {
        let matching: Vec<ChainTrigger> = self
            .triggers
            .read()
            .await
            .iter()
            .filter(|t| t.follows(completed_job))
            .cloned()
            .collect();

        let mut started = 0;
        for trigger in matching {
            if let Some(delay) = trigger.start_delay() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.interrupt.cancelled() => {
                        tracing::warn!(
                            job = %trigger.job_name,
                            "Chain delay interrupted, starting immediately"
                        );
                    }
                }
            }

            tracing::info!(job = %trigger.job_name, follows = completed_job, "Starting chained job");
            match self.launcher.run_job(&trigger.job_name).await {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::error!(
                        job = %trigger.job_name,
                        follows = completed_job,
                        error = %e,
                        "Failed to start chained job"
                    );
                }
            }
        }
        started
    }
}

#[async_trait]
impl JobExecutionListener for JobChainCoordinator {
    async fn before_job(&self, _job_name: &str) {
        // Chaining only reacts to completion.
    }

    async fn after_job(&self, job_name: &str) {
        self.on_job_completed(job_name).await;
    }
}
