//! Read-only view of the scheduling engine's trigger state.
//!
//! The scheduling engine owns schedules; this module only answers "what is
//! the cron expression" and "when does it fire next" per job name.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::RwLock;

use crate::error::{FleetError, Result};

/// Live handle into the scheduling engine for one job.
pub trait SchedulerHandle: Send + Sync {
    fn cron_expression(&self) -> Option<String>;
    fn next_fire_time(&self) -> Option<DateTime<Utc>>;
}

/// Schedule backed by a cron expression (seconds field included).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            FleetError::Configuration(format!("invalid cron expression {:?}: {}", expression, e))
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }
}

impl SchedulerHandle for CronSchedule {
    fn cron_expression(&self) -> Option<String> {
        Some(self.expression.clone())
    }

    fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }
}

/// Handle for jobs that are registered but not time-triggered
/// (started manually or by chaining).
#[derive(Debug, Clone, Copy, Default)]
pub struct Unscheduled;

impl SchedulerHandle for Unscheduled {
    fn cron_expression(&self) -> Option<String> {
        None
    }

    fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Job name → scheduler handle. Unknown jobs answer `None`/`false`.
#[derive(Default)]
pub struct TriggerRegistry {
    sources: RwLock<HashMap<String, Arc<dyn SchedulerHandle>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `job_name` with its scheduler handle, replacing any earlier one.
    pub async fn register_scheduler_source(
        &self,
        job_name: &str,
        handle: Arc<dyn SchedulerHandle>,
    ) {
        self.sources
            .write()
            .await
            .insert(job_name.to_string(), handle);
        tracing::debug!(job = job_name, "Scheduler source registered");
    }

    pub async fn unregister(&self, job_name: &str) -> bool {
        self.sources.write().await.remove(job_name).is_some()
    }

    pub async fn has_job(&self, job_name: &str) -> bool {
        self.sources.read().await.contains_key(job_name)
    }

    pub async fn cron_expression(&self, job_name: &str) -> Option<String> {
        self.handle(job_name).await?.cron_expression()
    }

    pub async fn next_fire_time(&self, job_name: &str) -> Option<DateTime<Utc>> {
        self.handle(job_name).await?.next_fire_time()
    }

    pub async fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn handle(&self, job_name: &str) -> Option<Arc<dyn SchedulerHandle>> {
        self.sources.read().await.get(job_name).cloned()
    }
}
