use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::host::Host;
use crate::placement::store::{CoordinationStore, StoreWatch};

const HOSTS_PREFIX: &str = "hosts/";
const JOBS_PREFIX: &str = "jobs/";

/// What the coordination store records about one job running on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstanceDetails {
    pub host_name: String,
    pub registered_at: DateTime<Utc>,
}

impl JobInstanceDetails {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            registered_at: Utc::now(),
        }
    }
}

/// Maps job names to the hosts configured to run them.
///
/// Every call goes straight to the backing store; errors are returned to the
/// caller, who decides whether to retry.
pub struct JobPlacementRegistry {
    store: Arc<dyn CoordinationStore>,
}

fn host_key(host: &Host) -> String {
    format!("{}{}", HOSTS_PREFIX, host.key())
}

fn placement_key(job_name: &str, host: &Host) -> String {
    format!("{}{}/{}", JOBS_PREFIX, job_name, host.key())
}

/// Split `jobs/{job}/{host_key}` into its parts.
fn parse_placement_key(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(JOBS_PREFIX)?.rsplit_once('/')
}

fn decode<T: DeserializeOwned>(key: &str, value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).map_err(|e| {
        FleetError::CoordinationService(format!("invalid record at {}: {}", key, e))
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| FleetError::Internal(e.to_string()))
}

impl JobPlacementRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn register_host(&self, host: &Host) -> Result<()> {
        self.store.put(&host_key(host), encode(host)?).await?;
        tracing::debug!(host = %host, "Host registered");
        Ok(())
    }

    pub async fn deregister_host(&self, host: &Host) -> Result<()> {
        self.store.delete(&host_key(host)).await?;
        Ok(())
    }

    pub async fn registered_hosts(&self) -> Result<BTreeSet<Host>> {
        self.store
            .list(HOSTS_PREFIX)
            .await?
            .iter()
            .map(|(key, value)| decode::<Host>(key, value))
            .collect()
    }

    /// Hosts currently running `job_name`; empty if the job is unknown.
    pub async fn hosts_for_job(&self, job_name: &str) -> Result<BTreeSet<Host>> {
        let hosts = self.hosts_by_key().await?;
        let prefix = format!("{}{}/", JOBS_PREFIX, job_name);

        let mut result = BTreeSet::new();
        for (key, _) in self.store.list(&prefix).await? {
            let Some((_, host_key)) = parse_placement_key(&key) else {
                continue;
            };
            match hosts.get(host_key) {
                Some(host) => {
                    result.insert(host.clone());
                }
                None => {
                    tracing::warn!(job = job_name, host_key, "Placement refers to unregistered host");
                }
            }
        }
        Ok(result)
    }

    /// Jobs placed on `host`.
    pub async fn jobs_on_host(&self, host: &Host) -> Result<BTreeSet<String>> {
        let wanted = host.key();
        Ok(self
            .store
            .list(JOBS_PREFIX)
            .await?
            .iter()
            .filter_map(|(key, _)| parse_placement_key(key))
            .filter(|(_, host_key)| *host_key == wanted)
            .map(|(job, _)| job.to_string())
            .collect())
    }

    /// Full job → hosts relation in one pass over the store.
    pub async fn placements(&self) -> Result<BTreeMap<String, BTreeSet<Host>>> {
        let hosts = self.hosts_by_key().await?;
        let mut result: BTreeMap<String, BTreeSet<Host>> = BTreeMap::new();

        for (key, _) in self.store.list(JOBS_PREFIX).await? {
            let Some((job, host_key)) = parse_placement_key(&key) else {
                continue;
            };
            if let Some(host) = hosts.get(host_key) {
                result
                    .entry(job.to_string())
                    .or_default()
                    .insert(host.clone());
            }
        }
        Ok(result)
    }

    pub async fn instance_details(
        &self,
        job_name: &str,
        host: &Host,
    ) -> Result<Option<JobInstanceDetails>> {
        let key = placement_key(job_name, host);
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(decode(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Idempotent: re-recording an existing pair replaces its record.
    pub async fn record_placement(&self, job_name: &str, host: &Host) -> Result<()> {
        let details = JobInstanceDetails::new(host.name.clone());
        self.store
            .put(&placement_key(job_name, host), encode(&details)?)
            .await?;
        tracing::debug!(job = job_name, host = %host, "Placement recorded");
        Ok(())
    }

    /// Idempotent: removing an absent pair is not an error.
    pub async fn remove_placement(&self, job_name: &str, host: &Host) -> Result<()> {
        if self.store.delete(&placement_key(job_name, host)).await? {
            tracing::debug!(job = job_name, host = %host, "Placement removed");
        }
        Ok(())
    }

    /// Watch every placement change across the fleet.
    pub async fn watch_placements(&self) -> Result<StoreWatch> {
        self.store.watch(JOBS_PREFIX).await
    }

    async fn hosts_by_key(&self) -> Result<HashMap<String, Host>> {
        Ok(self
            .registered_hosts()
            .await?
            .into_iter()
            .map(|h| (h.key(), h))
            .collect())
    }
}
