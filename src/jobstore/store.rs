use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::jobstore::definition::JobDefinition;

/// File name of the job definition inside a job directory.
pub const DEFINITION_FILE: &str = "job.json";

/// Per-job configuration directories under a single root.
///
/// Layout: `{root}/{job_name}/job.json` plus any number of dependency files
/// next to it. Writes go through a hidden temp file and a rename, so readers
/// never observe partial contents.
#[derive(Debug, Clone)]
pub struct JobConfigStore {
    root: PathBuf,
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(FleetError::Configuration(format!(
            "invalid {} name: {:?}",
            kind, name
        )))
    }
}

fn validate_dependency_name(file_name: &str) -> Result<()> {
    validate_name("dependency", file_name)?;
    if file_name == DEFINITION_FILE {
        return Err(FleetError::Configuration(format!(
            "dependency may not be named {}",
            DEFINITION_FILE
        )));
    }
    Ok(())
}

/// Map a missing file to `None`.
fn optional<T>(result: std::io::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(dir: &Path, file_name: &str, contents: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, dir.join(file_name)).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

impl JobConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_name: &str) -> Result<PathBuf> {
        validate_name("job", job_name)?;
        Ok(self.root.join(job_name))
    }

    /// Directory holding `job_name`'s files, created if absent.
    pub async fn directory_for(&self, job_name: &str) -> Result<PathBuf> {
        let dir = self.job_dir(job_name)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Path of the definition file, or `None` if the job has none yet.
    pub async fn definition_path(&self, job_name: &str) -> Result<Option<PathBuf>> {
        let path = self.job_dir(job_name)?.join(DEFINITION_FILE);
        Ok(fs::try_exists(&path).await?.then_some(path))
    }

    pub async fn write_definition(&self, job_name: &str, contents: &[u8]) -> Result<()> {
        let dir = self.directory_for(job_name).await?;
        write_atomic(&dir, DEFINITION_FILE, contents).await?;
        tracing::debug!(job = job_name, bytes = contents.len(), "Definition written");
        Ok(())
    }

    pub async fn read_definition(&self, job_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.job_dir(job_name)?.join(DEFINITION_FILE);
        optional(fs::read(path).await)
    }

    /// Read and parse the stored definition.
    pub async fn definition(&self, job_name: &str) -> Result<Option<JobDefinition>> {
        match self.read_definition(job_name).await? {
            Some(bytes) => Ok(Some(JobDefinition::parse(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete the definition file only; dependencies stay in place.
    /// Returns whether a definition existed.
    pub async fn remove_definition(&self, job_name: &str) -> Result<bool> {
        let path = self.job_dir(job_name)?.join(DEFINITION_FILE);
        Ok(optional(fs::remove_file(path).await)?.is_some())
    }

    pub async fn add_dependency(&self, job_name: &str, file_name: &str, bytes: &[u8]) -> Result<()> {
        validate_dependency_name(file_name)?;
        let dir = self.directory_for(job_name).await?;
        write_atomic(&dir, file_name, bytes).await?;
        tracing::debug!(job = job_name, file = file_name, bytes = bytes.len(), "Dependency written");
        Ok(())
    }

    pub async fn read_dependency(&self, job_name: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
        validate_dependency_name(file_name)?;
        let path = self.job_dir(job_name)?.join(file_name);
        optional(fs::read(path).await)
    }

    pub async fn remove_dependency(&self, job_name: &str, file_name: &str) -> Result<bool> {
        validate_dependency_name(file_name)?;
        let path = self.job_dir(job_name)?.join(file_name);
        Ok(optional(fs::remove_file(path).await)?.is_some())
    }

    /// Dependency file names (not paths), sorted. Empty if there are none.
    pub async fn list_dependencies(&self, job_name: &str) -> Result<Vec<String>> {
        let dir = self.job_dir(job_name)?;
        let Some(mut entries) = optional(fs::read_dir(&dir).await)? else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != DEFINITION_FILE && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete the job directory with everything in it.
    pub async fn remove_job(&self, job_name: &str) -> Result<bool> {
        let dir = self.job_dir(job_name)?;
        let removed = optional(fs::remove_dir_all(&dir).await)?.is_some();
        if removed {
            tracing::info!(job = job_name, "Job directory removed");
        }
        Ok(removed)
    }

    /// Names of all jobs with a definition under the root.
    pub async fn list_jobs(&self) -> Result<Vec<String>> {
        let Some(mut entries) = optional(fs::read_dir(&self.root).await)? else {
            return Ok(Vec::new());
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_name("job", &name).is_err() {
                continue;
            }
            if fs::try_exists(entry.path().join(DEFINITION_FILE)).await? {
                jobs.push(name);
            }
        }
        jobs.sort();
        Ok(jobs)
    }
}
