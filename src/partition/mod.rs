//! Partitioned reads within a single job run.
//!
//! A job's input is split into [`PartitionContext`]s at submission time. One
//! worker per partition opens it on the shared [`PartitionedReadAggregator`]
//! and reads items until end-of-data. A [`PartitionBarrier`] lets a worker
//! that has run out of local data wait (bounded) for its siblings.

pub mod aggregator;
pub mod barrier;
pub mod context;

pub use aggregator::{PartitionReader, PartitionedReadAggregator, DEFAULT_READ_TIMEOUT};
pub use barrier::PartitionBarrier;
pub use context::PartitionContext;
