//! Turning stored job configuration into live state on this host.
//!
//! Loading a job records its placement for the current host, registers its
//! schedule with the [`TriggerRegistry`] and its chain trigger with the
//! [`JobChainCoordinator`]. Unloading reverses all of it.

use std::sync::Arc;

use crate::chain::JobChainCoordinator;
use crate::error::{FleetError, Result};
use crate::host::HostDirectory;
use crate::jobstore::{job_name_from_definition, JobConfigStore, JobDeclaration, JobDefinition};
use crate::placement::JobPlacementRegistry;
use crate::trigger::{CronSchedule, SchedulerHandle, TriggerRegistry, Unscheduled};

pub struct JobLoader {
    store: Arc<JobConfigStore>,
    directory: Arc<HostDirectory>,
    registry: Arc<JobPlacementRegistry>,
    triggers: Arc<TriggerRegistry>,
    chains: Arc<JobChainCoordinator>,
}

impl JobLoader {
    pub fn new(
        store: Arc<JobConfigStore>,
        directory: Arc<HostDirectory>,
        registry: Arc<JobPlacementRegistry>,
        triggers: Arc<TriggerRegistry>,
        chains: Arc<JobChainCoordinator>,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            triggers,
            chains,
        }
    }

    /// Load `job_name` from its stored definition.
    ///
    /// # Errors
    ///
    /// - [`FleetError::JobNotFound`] if no definition is stored
    /// - [`FleetError::Configuration`] if the definition is malformed, declares
    ///   a different job, or carries an invalid cron expression
    /// - [`FleetError::CoordinationService`] if the placement cannot be recorded
    pub async fn load_job(&self, job_name: &str) -> Result<JobDeclaration> {
        let bytes = self
            .store
            .read_definition(job_name)
            .await?
            .ok_or_else(|| FleetError::JobNotFound(job_name.to_string()))?;

        match job_name_from_definition(&bytes)? {
            Some(declared) if declared == job_name => {}
            Some(declared) => {
                return Err(FleetError::Configuration(format!(
                    "definition stored for {} declares job {}",
                    job_name, declared
                )));
            }
            None => {
                return Err(FleetError::Configuration(format!(
                    "definition stored for {} declares no job",
                    job_name
                )));
            }
        }

        let declaration = JobDefinition::parse(&bytes)?
            .primary()
            .cloned()
            .ok_or_else(|| FleetError::Internal("declared job vanished".into()))?;
        declaration.partition_contexts()?;

        let schedule: Arc<dyn SchedulerHandle> = match declaration.cron.as_deref() {
            Some(expression) => Arc::new(CronSchedule::parse(expression)?),
            None => Arc::new(Unscheduled),
        };

        let current = self.directory.current_host()?;
        self.registry.record_placement(job_name, &current).await?;
        self.triggers
            .register_scheduler_source(job_name, schedule)
            .await;
        self.chains.remove_triggers_for(job_name).await;
        if let Some(trigger) = declaration.chain_trigger() {
            self.chains.register(trigger).await;
        }

        tracing::info!(
            job = job_name,
            cron = declaration.cron.as_deref().unwrap_or("-"),
            follows = declaration.follow_job.as_deref().unwrap_or("-"),
            "Job loaded"
        );
        Ok(declaration)
    }

    /// Remove `job_name` from this host entirely, including its files.
    pub async fn unload_job(&self, job_name: &str) -> Result<()> {
        let current = self.directory.current_host()?;
        self.registry.remove_placement(job_name, &current).await?;
        self.triggers.unregister(job_name).await;
        self.chains.remove_triggers_for(job_name).await;
        self.store.remove_job(job_name).await?;
        tracing::info!(job = job_name, "Job unloaded");
        Ok(())
    }

    /// Load every job found in the store. Returns how many loaded; failures
    /// are logged per job.
    pub async fn load_all(&self) -> Result<usize> {
        let mut loaded = 0;
        for job in self.store.list_jobs().await? {
            match self.load_job(&job).await {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(job = %job, error = %e, "Failed to load job"),
            }
        }
        Ok(loaded)
    }
}
