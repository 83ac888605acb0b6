//! Job placement backed by a coordination service.
//!
//! - [`CoordinationStore`]: key/value + watch interface to the external store
//! - [`InMemoryCoordinationStore`]: process-local implementation
//! - [`JobPlacementRegistry`]: job ↔ host relation and host registrations

pub mod registry;
pub mod store;

pub use registry::{JobInstanceDetails, JobPlacementRegistry};
pub use store::{CoordinationStore, InMemoryCoordinationStore, StoreWatch, WatchEvent};
