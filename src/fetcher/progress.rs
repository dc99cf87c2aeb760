//! Throttled progress reporting for one candidate fetch

use crate::error::DeliveryError;
use crate::types::Progress;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Receives throttled transfer progress
///
/// Failures are logged by the fetcher and never abort the transfer.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Report a progress snapshot
    async fn report(&self, progress: Progress) -> Result<(), DeliveryError>;
}

/// Shared byte counter for all segments of one fetch
pub(crate) struct ProgressTracker {
    downloaded: AtomicU64,
    total: u64,
    started: Instant,
    last_report: Mutex<Instant>,
    interval: Duration,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl ProgressTracker {
    pub(crate) fn new(
        total: u64,
        interval: Duration,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            downloaded: AtomicU64::new(0),
            total,
            started: now,
            last_report: Mutex::new(now),
            interval,
            reporter,
        }
    }

    /// Count bytes that were already on disk before this fetch
    pub(crate) fn add_resumed(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Forget bytes of a partial file that is being discarded
    pub(crate) fn rewind(&self, bytes: u64) {
        // Saturating so a rewind can never wrap the counter
        let _ = self
            .downloaded
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    pub(crate) fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Record a written chunk and report if the interval has elapsed
    pub(crate) async fn add(&self, bytes: u64) {
        let downloaded = self.downloaded.fetch_add(bytes, Ordering::Relaxed) + bytes;

        let Some(reporter) = &self.reporter else {
            return;
        };
        if !self.take_report_slot() {
            return;
        }

        let progress = Progress {
            bytes_downloaded: downloaded,
            total_bytes: self.total,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        };
        if let Err(e) = reporter.report(progress).await {
            tracing::warn!(error = %e, "Progress report failed");
        }
    }

    fn take_report_slot(&self) -> bool {
        let Ok(mut last) = self.last_report.lock() else {
            return false;
        };
        if last.elapsed() < self.interval {
            return false;
        }
        *last = Instant::now();
        true
    }
}
