//! Replication of job configuration across the fleet.
//!
//! - [`HostTransport`]: moves files and commands between hosts
//! - [`HttpTransport`]: transport over the peers' HTTP endpoints
//! - [`JobSyncService`]: push, retrying push, pull, deploy and fleet-wide sync

pub mod service;
pub mod transport;

pub use service::{JobSyncService, PushRecord, SyncFailure, SyncReport};
pub use transport::{HostTransport, HttpTransport};
