use std::process::Stdio;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::chain::{JobExecutionListener, JobLauncher};
use crate::error::{FleetError, Result};
use crate::jobstore::JobConfigStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of job execution
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub job_name: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Runs a job's declared `command` with `sh -c` inside the job directory.
///
/// Jobs without a command complete immediately. Listeners hear about every
/// start and every successful completion, which is what drives chaining.
///
/// Cloning is cheap; clones share the store and the listener slot.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<JobConfigStore>,
    listener: Arc<OnceLock<Weak<dyn JobExecutionListener>>>,
}

impl JobExecutor {
    pub fn new(store: Arc<JobConfigStore>) -> Self {
        Self {
            store,
            listener: Arc::new(OnceLock::new()),
        }
    }

    /// Attach the completion listener. Held weakly; only the first call wins.
    pub fn set_listener(&self, listener: &Arc<dyn JobExecutionListener>) {
        if self.listener.set(Arc::downgrade(listener)).is_err() {
            tracing::warn!("Execution listener already set, ignoring");
        }
    }

    fn listener(&self) -> Option<Arc<dyn JobExecutionListener>> {
        self.listener.get().and_then(Weak::upgrade)
    }

    /// Execute `job_name` and report the outcome.
    pub async fn execute(&self, job_name: &str) -> Result<ExecutionResult> {
        let definition = self
            .store
            .definition(job_name)
            .await?
            .ok_or_else(|| FleetError::JobNotFound(job_name.to_string()))?;
        let command = definition
            .declaration(job_name)
            .and_then(|d| d.command.clone());

        let Some(command) = command else {
            tracing::info!(job = job_name, "Job has no command, nothing to execute");
            return Ok(ExecutionResult {
                job_name: job_name.to_string(),
                status: JobStatus::Completed,
                exit_code: None,
                output: None,
                error: None,
            });
        };

        let dir = self.store.directory_for(job_name).await?;
        tracing::info!(job = job_name, command = %command, "Executing job");

        let result = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Ok(Self::process_output(job_name, result))
    }

    fn process_output(
        job_name: &str,
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                let (status, error) = if output.status.success() {
                    (JobStatus::Completed, None)
                } else {
                    (
                        JobStatus::Failed,
                        Some(if stderr.is_empty() {
                            format!("Exit code: {:?}", exit_code)
                        } else {
                            stderr
                        }),
                    )
                };

                tracing::info!(
                    job = job_name,
                    status = %status,
                    exit_code = ?exit_code,
                    "Job finished"
                );

                ExecutionResult {
                    job_name: job_name.to_string(),
                    status,
                    exit_code,
                    output: if stdout.is_empty() {
                        None
                    } else {
                        Some(stdout)
                    },
                    error,
                }
            }
            Err(e) => {
                tracing::error!(job = job_name, error = %e, "Job execution failed");
                ExecutionResult {
                    job_name: job_name.to_string(),
                    status: JobStatus::Failed,
                    exit_code: None,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

impl JobExecutor {
    /// Run `job_name` to completion on the calling task, notifying the
    /// listener before and, on success, after. Chained jobs are started
    /// from inside the `after_job` callback.
    ///
    /// # Errors
    ///
    /// `JobNotFound` without a definition, `Internal` when the command
    /// fails.
    pub async fn run(&self, job_name: &str) -> Result<ExecutionResult> {
        let listener = self.listener();
        if let Some(listener) = &listener {
            listener.before_job(job_name).await;
        }

        let result = self.execute(job_name).await?;
        if result.status != JobStatus::Completed {
            return Err(FleetError::Internal(format!(
                "job {} failed: {}",
                job_name,
                result.error.unwrap_or_default()
            )));
        }

        if let Some(listener) = &listener {
            listener.after_job(job_name).await;
        }
        Ok(result)
    }
}

#[async_trait]
impl JobLauncher for JobExecutor {
    /// Returns as soon as the run is under way on its own task.
    async fn run_job(&self, job_name: &str) -> Result<()> {
        if self.store.definition_path(job_name).await?.is_none() {
            return Err(FleetError::JobNotFound(job_name.to_string()));
        }

        let executor = self.clone();
        let job = job_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = executor.run(&job).await {
                tracing::warn!(job = %job, error = %e, "Job run failed");
            }
        });
        Ok(())
    }
}
