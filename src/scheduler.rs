//! Global bound on concurrent whole-file downloads
//!
//! One slot covers every escalation stage of one descriptor. Segments inside a
//! fetch do not take extra slots.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting scheduler for whole-file downloads
#[derive(Clone, Debug)]
pub struct DownloadScheduler {
    slots: Arc<Semaphore>,
    limit: usize,
}

/// A held download slot, released when dropped
///
/// Dropping happens on every exit path of the holder, including errors and panics.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl DownloadScheduler {
    /// Create a scheduler admitting at most `limit` concurrent downloads
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a free slot
    ///
    /// Returns [`Error::ShuttingDown`] once the scheduler has been closed.
    pub async fn acquire_slot(&self) -> Result<SlotPermit> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;
        Ok(SlotPermit { _permit: permit })
    }

    /// Configured maximum
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Stop admitting downloads; waiters and later callers get [`Error::ShuttingDown`]
    ///
    /// Downloads already holding a slot keep it until they finish.
    pub fn close(&self) {
        self.slots.close();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn burst_never_exceeds_limit() {
        let limit = 5;
        let scheduler = DownloadScheduler::new(limit);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..limit * 10 {
            let scheduler = scheduler.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.spawn(async move {
                let _slot = scheduler.acquire_slot().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= limit);
        assert_eq!(peak.load(Ordering::SeqCst), limit, "burst should saturate the limit");
        assert_eq!(scheduler.available(), limit);
    }

    #[tokio::test]
    async fn slot_is_released_when_holder_fails() {
        let scheduler = DownloadScheduler::new(1);

        let failing = {
            let scheduler = scheduler.clone();
            async move {
                let _slot = scheduler.acquire_slot().await?;
                Err::<(), Error>(Error::Other("download failed".into()))
            }
        };
        assert!(failing.await.is_err());
        assert_eq!(scheduler.available(), 1);

        let panicking = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let _slot = scheduler.acquire_slot().await.unwrap();
                panic!("task blew up");
            })
        };
        assert!(panicking.await.is_err());
        assert_eq!(scheduler.available(), 1);
    }

    #[tokio::test]
    async fn waiters_get_slot_after_release() {
        let scheduler = DownloadScheduler::new(1);
        let first = scheduler.acquire_slot().await.unwrap();

        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.acquire_slot().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_scheduler_rejects_new_downloads() {
        let scheduler = DownloadScheduler::new(2);
        let held = scheduler.acquire_slot().await.unwrap();

        scheduler.close();

        assert!(matches!(
            scheduler.acquire_slot().await,
            Err(Error::ShuttingDown)
        ));
        drop(held);
        assert_eq!(scheduler.limit(), 2);
    }
}
