//! Status message text and live progress edits.

use crate::delivery::Transport;
use crate::error::DeliveryError;
use crate::fetcher::ProgressReporter;
use crate::types::{DestinationId, Event, MessageHandle, Progress};
use crate::utils::format_mb;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub(crate) fn processing_text(name: &str) -> String {
    format!("Processing: `{}`. Initializing...", name)
}

pub(crate) fn found_text(name: &str) -> String {
    format!("Found: `{}`. Starting download...", name)
}

pub(crate) fn download_failed_text(name: &str) -> String {
    format!("Failed to download `{}`.", name)
}

pub(crate) fn too_large_text(name: &str, size_bytes: u64, limit_bytes: u64) -> String {
    format!(
        "File `{}` is too large ({:.2} GB). Max {:.2} GB.",
        name,
        size_bytes as f64 / BYTES_PER_GB,
        limit_bytes as f64 / BYTES_PER_GB
    )
}

pub(crate) fn not_media_text(name: &str) -> String {
    format!(
        "Skipped non-video file: `{}`. Only video files are processed.",
        name
    )
}

/// Multi-line progress text: size, downloaded amount, percent and speed
pub(crate) fn progress_text(name: &str, progress: &Progress) -> String {
    let size = if progress.total_bytes > 0 {
        format_mb(progress.total_bytes)
    } else {
        "unknown".to_string()
    };
    let percent = progress
        .percent()
        .map(|p| format!(" ({:.0}%)", p.min(100.0)))
        .unwrap_or_default();

    format!(
        "Downloading `{}`\nSize: {}\nProgress: {}/{}{}\nSpeed: {:.2} MB/s",
        name,
        size,
        format_mb(progress.bytes_downloaded),
        size,
        percent,
        progress.speed_bps() / BYTES_PER_MB
    )
}

/// Edits one file's status message with throttled progress and mirrors each
/// snapshot onto the event stream
pub(crate) struct StatusReporter {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) chat: DestinationId,
    /// `None` when the status message could not be posted
    pub(crate) handle: Option<MessageHandle>,
    pub(crate) name: String,
    pub(crate) events: broadcast::Sender<Event>,
}

#[async_trait]
impl ProgressReporter for StatusReporter {
    async fn report(&self, progress: Progress) -> Result<(), DeliveryError> {
        let _ = self.events.send(Event::Downloading {
            name: self.name.clone(),
            progress,
        });

        let Some(handle) = self.handle else {
            return Ok(());
        };
        self.transport
            .send_progress(self.chat, Some(handle), &progress_text(&self.name, &progress))
            .await
            .map(|_| ())
    }
}
