use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Identifies one partition of a job's input: its index and the total count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionContext {
    pub partition_index: usize,
    pub total_partitions: usize,
}

impl PartitionContext {
    pub fn new(partition_index: usize, total_partitions: usize) -> Result<Self> {
        if total_partitions == 0 {
            return Err(FleetError::Configuration(
                "partition count must be at least 1".into(),
            ));
        }
        if partition_index >= total_partitions {
            return Err(FleetError::Configuration(format!(
                "partition index {} out of range for {} partitions",
                partition_index, total_partitions
            )));
        }
        Ok(Self {
            partition_index,
            total_partitions,
        })
    }

    /// Every context for one submission split `total_partitions` ways.
    pub fn split(total_partitions: usize) -> Result<Vec<Self>> {
        (0..total_partitions.max(1))
            .map(|i| Self::new(i, total_partitions))
            .collect()
    }

    /// Index range of a `len`-item data set owned by this partition. The
    /// first `len % total` partitions take one extra item.
    pub fn slice(&self, len: usize) -> Range<usize> {
        let base = len / self.total_partitions;
        let extra = len % self.total_partitions;
        let start = self.partition_index * base + self.partition_index.min(extra);
        let size = base + usize::from(self.partition_index < extra);
        start..start + size
    }
}
