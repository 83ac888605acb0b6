use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::partition::barrier::PartitionBarrier;
use crate::partition::context::PartitionContext;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Reads one partition's data in a single batch.
#[async_trait]
pub trait PartitionReader: Send + Sync {
    type Item: Send + 'static;

    async fn read_batch(&self, partition: &PartitionContext) -> Result<Vec<Self::Item>>;
}

struct ReadState<T> {
    buffer: VecDeque<T>,
    pending: VecDeque<(PartitionContext, Arc<PartitionBarrier>)>,
    barrier: Option<Arc<PartitionBarrier>>,
}

/// Merges per-partition batch reads into one item-at-a-time stream.
///
/// Each worker calls [`open`](Self::open) for its partition and then
/// [`read`](Self::read) until it returns `None`. Items come out in the order
/// partitions finish; every item is handed out exactly once.
///
/// The state lock only guards buffer and queue bookkeeping. Batch reads run
/// outside it so partitions read in parallel.
pub struct PartitionedReadAggregator<R: PartitionReader> {
    delegate: R,
    read_timeout: Duration,
    state: Mutex<ReadState<R::Item>>,
}

impl<R: PartitionReader> PartitionedReadAggregator<R> {
    pub fn new(delegate: R) -> Self {
        Self::with_timeout(delegate, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeout(delegate: R, read_timeout: Duration) -> Self {
        Self {
            delegate,
            read_timeout,
            state: Mutex::new(ReadState {
                buffer: VecDeque::new(),
                pending: VecDeque::new(),
                barrier: None,
            }),
        }
    }

    pub fn delegate(&self) -> &R {
        &self.delegate
    }

    /// Queue a partition for reading. The first open of a run creates the
    /// barrier, sized from the context's partition count.
    pub fn open(&self, partition: PartitionContext) -> Result<()> {
        // Re-validate: fields are public
        let partition =
            PartitionContext::new(partition.partition_index, partition.total_partitions)?;

        let mut state = self.state.lock();
        let barrier = match &state.barrier {
            Some(b) if !b.is_complete() => b.clone(),
            _ => {
                let b = Arc::new(PartitionBarrier::new(partition.total_partitions));
                tracing::debug!(partitions = partition.total_partitions, "Partition barrier created");
                state.barrier = Some(b.clone());
                b
            }
        };
        state.pending.push_back((partition, barrier));
        Ok(())
    }

    /// Drop a fully counted-down barrier so the next run starts clean.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.pending.is_empty() && state.barrier.as_ref().is_some_and(|b| b.is_complete()) {
            state.barrier = None;
        }
    }

    /// Next item, or `None` once every partition of the run is drained (or the
    /// wait for outstanding partitions timed out).
    ///
    /// # Errors
    ///
    /// Propagates a failed batch read. That partition still counts as
    /// finished for the barrier.
    ///
    /// A batch that completes after its run timed out is dropped, and the
    /// reader that fetched it gets `None`.
    pub async fn read(&self) -> Result<Option<R::Item>> {
        loop {
            let next = {
                let mut state = self.state.lock();
                if let Some(item) = state.buffer.pop_front() {
                    return Ok(Some(item));
                }
                state.pending.pop_front()
            };

            let Some((partition, barrier)) = next else {
                return Ok(self.wait_for_siblings().await);
            };

            let result = self.delegate.read_batch(&partition).await;

            let mut state = self.state.lock();
            let current = state
                .barrier
                .as_ref()
                .is_some_and(|b| Arc::ptr_eq(b, &barrier));
            if !current {
                // The run this partition belonged to already ended
                barrier.count_down();
                match result {
                    Ok(items) => tracing::warn!(
                        partition = partition.partition_index,
                        dropped = items.len(),
                        "Partition batch finished after its run ended, dropping items"
                    ),
                    Err(e) => tracing::warn!(
                        partition = partition.partition_index,
                        error = %e,
                        "Partition batch failed after its run ended"
                    ),
                }
                return Ok(None);
            }

            match result {
                Ok(items) => {
                    tracing::trace!(
                        partition = partition.partition_index,
                        items = items.len(),
                        "Partition batch read"
                    );
                    state.buffer.extend(items);
                    barrier.count_down();
                    if let Some(item) = state.buffer.pop_front() {
                        return Ok(Some(item));
                    }
                    // Empty batch: look for more work
                }
                Err(e) => {
                    barrier.count_down();
                    tracing::warn!(
                        partition = partition.partition_index,
                        error = %e,
                        "Partition batch read failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn wait_for_siblings(&self) -> Option<R::Item> {
        let barrier = self.state.lock().barrier.clone();

        if let Some(barrier) = barrier {
            if !barrier.wait(self.read_timeout).await {
                tracing::warn!(
                    outstanding = barrier.remaining(),
                    total = barrier.total(),
                    timeout_ms = self.read_timeout.as_millis() as u64,
                    "Timed out waiting for partitions, continuing with data read so far"
                );
            }

            let mut state = self.state.lock();
            state.pending.retain(|(_, b)| !Arc::ptr_eq(b, &barrier));
            if state
                .barrier
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &barrier))
            {
                state.barrier = None;
            }
        }

        self.state.lock().buffer.pop_front()
    }

    /// Items read from partitions but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }
}
