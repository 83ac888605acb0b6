//! Default job launcher.
//!
//! The batch execution engine proper lives outside this crate. [`JobExecutor`]
//! stands in for it: it runs a job's declared shell command, captures its
//! output, and notifies the execution listener so chained jobs start.

pub mod executor;

pub use executor::{ExecutionResult, JobExecutor, JobStatus};
