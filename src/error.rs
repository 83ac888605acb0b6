use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Coordination service error: {0}")]
    CoordinationService(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Host {host} rejected load of job {job}: {reason}")]
    LoadRejected {
        job: String,
        host: String,
        reason: String,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Failures worth retrying at the orchestrating level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FleetError::CoordinationService(_) | FleetError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(e: reqwest::Error) -> Self {
        FleetError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
