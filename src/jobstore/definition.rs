use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chain::ChainTrigger;
use crate::error::{FleetError, Result};
use crate::partition::PartitionContext;

/// Parsed contents of a job definition file.
///
/// ```json
/// {
///   "jobs": [
///     { "name": "nightlyReport", "cron": "0 0 2 * * *", "command": "./report.sh" },
///     { "name": "publish", "follow_job": "nightlyReport", "start_delay_ms": 5000 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(default)]
    pub jobs: Vec<JobDeclaration>,
}

/// One named job declaration and its attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDeclaration {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_job: Option<String>,
    #[serde(default)]
    pub start_delay_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl JobDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The chain trigger this declaration asks for, if it follows another job.
    pub fn chain_trigger(&self) -> Option<ChainTrigger> {
        self.follow_job
            .as_ref()
            .filter(|f| !f.trim().is_empty())
            .map(|follow| ChainTrigger::new(follow.clone(), self.start_delay_ms, self.name.clone()))
    }

    /// Contexts for one partitioned run of this job. Unset means a single
    /// partition; zero is a `Configuration` error.
    pub fn partition_contexts(&self) -> Result<Vec<PartitionContext>> {
        PartitionContext::split(self.partitions.map_or(1, |n| n as usize))
    }
}

impl JobDefinition {
    pub fn single(declaration: JobDeclaration) -> Self {
        Self {
            jobs: vec![declaration],
        }
    }

    /// Parse a definition payload.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Configuration`] if the payload is not a valid
    /// definition document.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| FleetError::Configuration(format!("malformed job definition: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| FleetError::Internal(e.to_string()))
    }

    /// The first declaration carrying a name.
    pub fn primary(&self) -> Option<&JobDeclaration> {
        self.jobs.iter().find(|j| !j.name.trim().is_empty())
    }

    pub fn declaration(&self, name: &str) -> Option<&JobDeclaration> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Extract the declared job name from a definition payload.
///
/// `Ok(None)` means the payload is well formed but declares no job; a
/// malformed payload is a [`FleetError::Configuration`] error.
pub fn job_name_from_definition(bytes: &[u8]) -> Result<Option<String>> {
    Ok(JobDefinition::parse(bytes)?.primary().map(|j| j.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_first_named_declaration() {
        let payload = br#"{"jobs":[{"cron":"0 * * * * *"},{"name":"nightlyReport"},{"name":"other"}]}"#;
        assert_eq!(
            job_name_from_definition(payload).unwrap().as_deref(),
            Some("nightlyReport")
        );
    }

    #[test]
    fn no_declaration_is_none() {
        assert_eq!(job_name_from_definition(br#"{"jobs":[]}"#).unwrap(), None);
        assert_eq!(job_name_from_definition(b"{}").unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_configuration_error() {
        let err = job_name_from_definition(b"<job id=\"x\"/>").unwrap_err();
        assert!(matches!(err, FleetError::Configuration(_)));
    }

    #[test]
    fn declaration_attributes_parse() {
        let payload = br#"{"jobs":[{
            "name":"publish",
            "follow_job":"nightlyReport",
            "start_delay_ms":500,
            "partitions":4,
            "attributes":{"owner":"finance"}
        }]}"#;
        let def = JobDefinition::parse(payload).unwrap();
        let decl = def.declaration("publish").unwrap();
        assert_eq!(decl.partitions, Some(4));
        assert_eq!(decl.attributes["owner"], "finance");

        let trigger = decl.chain_trigger().unwrap();
        assert_eq!(trigger.follow_job, "nightlyReport");
        assert_eq!(trigger.start_delay_ms, 500);
        assert_eq!(trigger.job_name, "publish");
    }

    #[test]
    fn partition_contexts_follow_declared_count() {
        let mut decl = JobDeclaration::new("x");
        assert_eq!(decl.partition_contexts().unwrap().len(), 1);

        decl.partitions = Some(4);
        let contexts = decl.partition_contexts().unwrap();
        assert_eq!(contexts.len(), 4);
        assert!(contexts.iter().all(|c| c.total_partitions == 4));

        decl.partitions = Some(0);
        assert!(matches!(
            decl.partition_contexts(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn blank_follow_job_is_no_trigger() {
        let mut decl = JobDeclaration::new("x");
        decl.follow_job = Some("  ".into());
        assert!(decl.chain_trigger().is_none());
    }

    #[test]
    fn serialized_definition_parses_back() {
        let mut decl = JobDeclaration::new("nightlyReport");
        decl.cron = Some("0 0 2 * * *".into());
        let def = JobDefinition::single(decl);
        assert_eq!(JobDefinition::parse(&def.to_bytes().unwrap()).unwrap(), def);
    }
}
