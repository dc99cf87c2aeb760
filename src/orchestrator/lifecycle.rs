//! Startup sweep, background request tasks and shutdown coordination.

use crate::error::{Error, Result};
use crate::types::{Request, RequestReport};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::Orchestrator;

/// How long [`Orchestrator::shutdown`] waits for cancelled tasks to unwind
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the scratch directory and delete everything a previous process left in it
///
/// Returns the number of removed entries.
pub(crate) async fn sweep_scratch(dir: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to create scratch directory '{}': {}",
                dir.display(),
                e
            ),
        ))
    })?;

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale scratch entry")
            }
        }
    }

    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "Removed stale scratch entries");
    }
    Ok(removed)
}

impl Orchestrator {
    /// Process a request in the background
    ///
    /// The task is tracked so [`shutdown`](Self::shutdown) can wait for it. The
    /// handle yields the report, or `None` if the request failed or was cancelled.
    pub fn spawn_request(&self, request: Request) -> Result<JoinHandle<Option<RequestReport>>> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let this = self.clone();
        Ok(self.tasks.spawn(async move {
            let link = request.share_link.clone();
            match this.process_request(request).await {
                Ok(report) => Some(report),
                Err(Error::ShuttingDown) => None,
                Err(e) => {
                    tracing::error!(link = %link, error = %e, "Request failed");
                    None
                }
            }
        }))
    }

    /// Gracefully shut down the orchestrator
    ///
    /// 1. Stops accepting new requests
    /// 2. Cancels in-flight requests; their scratch directories are removed as
    ///    the tasks unwind
    /// 3. Closes the scheduler so queued files stop waiting for a slot
    /// 4. Waits for tracked tasks (at most 30 seconds)
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        self.cancel_token.cancel();
        self.scheduler.close();
        self.tasks.close();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tasks.wait()).await {
            Ok(()) => tracing::info!("All request tasks finished"),
            Err(_) => tracing::warn!(
                remaining = self.tasks.len(),
                "Timeout waiting for request tasks, proceeding with shutdown"
            ),
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether new requests are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }
}
