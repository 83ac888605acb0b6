pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod host;
pub mod jobstore;
pub mod loader;
pub mod node;
pub mod partition;
pub mod placement;
pub mod shutdown;
pub mod sync;
pub mod trigger;
pub mod worker;

pub use error::{FleetError, Result};
