//! On-disk job configuration.
//!
//! Each job owns one directory holding its definition file and any
//! dependency artifacts. [`JobDefinition`] is the typed form of the
//! definition file.

pub mod definition;
pub mod store;

pub use definition::{job_name_from_definition, JobDeclaration, JobDefinition};
pub use store::{JobConfigStore, DEFINITION_FILE};
