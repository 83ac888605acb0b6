use std::time::Duration;

use tokio::sync::watch;

/// Countdown shared by all partitions of one job run.
///
/// Starts at the partition count and is decremented once per partition when
/// its batch read finishes. Waiters block until it reaches zero or a timeout.
#[derive(Debug)]
pub struct PartitionBarrier {
    total: usize,
    remaining: watch::Sender<usize>,
}

impl PartitionBarrier {
    pub fn new(total: usize) -> Self {
        let (remaining, _) = watch::channel(total);
        Self { total, remaining }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the count left after decrementing. Never goes below zero.
    pub fn count_down(&self) -> usize {
        let mut left = 0;
        self.remaining.send_modify(|n| {
            *n = n.saturating_sub(1);
            left = *n;
        });
        left
    }

    /// Wait until the count reaches zero. Returns `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.remaining.subscribe();
        tokio::time::timeout(timeout, async move {
            rx.wait_for(|n| *n == 0).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }
}
