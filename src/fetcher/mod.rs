//! Segmented, resumable download of one candidate URL
//!
//! [`SegmentedFetcher`] splits a file of known size into byte ranges and fetches
//! them concurrently. Each segment is backed by its own partial file and retried on
//! its own, resuming from the bytes already on disk. Once all segments are complete
//! they are concatenated in range order and the result is checked against the
//! declared size.
//!
//! Files of unknown size, and origins that answer ranged requests with the whole
//! body, are fetched as a single stream instead.

mod progress;
mod segment;

pub use progress::ProgressReporter;
pub use segment::{ByteRange, plan_segments};

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::retry::download_with_retry;
use async_trait::async_trait;
use progress::ProgressTracker;
use segment::{Segment, partial_len, remove_partial, transfer_segment};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One candidate fetch
#[derive(Clone)]
pub struct FetchRequest {
    /// Candidate URL
    pub url: String,
    /// Where the merged artifact is written; partial files live next to it
    pub target: PathBuf,
    /// Size declared by the resolver, `None` when unknown
    pub expected_size: Option<u64>,
    /// Number of parallel ranges
    pub segment_count: usize,
    /// Receives throttled progress
    pub progress: Option<Arc<dyn ProgressReporter>>,
}

impl std::fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRequest")
            .field("url", &self.url)
            .field("target", &self.target)
            .field("expected_size", &self.expected_size)
            .field("segment_count", &self.segment_count)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Fetches one candidate URL into a local artifact
///
/// Returns the size of the artifact written to `request.target`.
#[async_trait]
pub trait CandidateFetcher: Send + Sync {
    /// Fetch a candidate
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<u64, FetchError>;
}

/// HTTP range-request implementation of [`CandidateFetcher`]
pub struct SegmentedFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
    read_timeout: Duration,
    progress_interval: Duration,
    min_size_ratio: f64,
}

impl SegmentedFetcher {
    /// Create a fetcher from the download and retry settings
    ///
    /// Only connecting is bounded by a timeout on the client. Waiting for response
    /// headers and each body chunk is bounded by `read_timeout`, so long transfers
    /// are never cut off while a silent peer still fails.
    pub fn new(download: &DownloadConfig, retry: &RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(download.connect_timeout)
            .user_agent(concat!("sharelink-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: retry.clone(),
            read_timeout: download.read_timeout,
            progress_interval: download.progress_interval,
            min_size_ratio: download.min_size_ratio,
        })
    }

    async fn fetch_segmented(
        &self,
        request: &FetchRequest,
        total: u64,
        tracker: &ProgressTracker,
    ) -> std::result::Result<(), FetchError> {
        let ranges = plan_segments(total, request.segment_count);
        let last = ranges.len().saturating_sub(1);
        let segments: Vec<Segment> = ranges
            .iter()
            .enumerate()
            .map(|(index, range)| Segment {
                index,
                start: range.start,
                // The final range reads to end of file so an underestimated size is not cut short
                end: (index != last).then_some(range.end),
                path: segment_path(&request.target, &request.url, index),
            })
            .collect();

        for segment in &segments {
            tracker.add_resumed(partial_len(&segment.path).await?);
        }

        debug!(
            url = %request.url,
            segments = segments.len(),
            resumed_bytes = tracker.downloaded(),
            "Starting segmented fetch"
        );

        let transfers = segments.iter().map(|segment| async move {
            download_with_retry(&self.retry, || {
                transfer_segment(&self.client, &request.url, segment, tracker, self.read_timeout)
            })
            .await
            .inspect_err(|e| {
                warn!(segment = segment.index, error = %e, "Segment failed");
            })
        });

        match futures::future::try_join_all(transfers).await {
            Ok(_) => {}
            Err(FetchError::RangesIgnored) => {
                info!(url = %request.url, "Origin ignores byte ranges, switching to a single stream");
                for segment in &segments {
                    tracker.rewind(partial_len(&segment.path).await?);
                    remove_partial(&segment.path).await?;
                }
                return self.fetch_single_stream(request, tracker).await;
            }
            Err(e) => return Err(e),
        }

        merge_segments(&segments, &request.target).await
    }

    async fn fetch_single_stream(
        &self,
        request: &FetchRequest,
        tracker: &ProgressTracker,
    ) -> std::result::Result<(), FetchError> {
        let segment = Segment::whole_file(stream_path(&request.target, &request.url));
        tracker.add_resumed(partial_len(&segment.path).await?);

        download_with_retry(&self.retry, || {
            transfer_segment(&self.client, &request.url, &segment, tracker, self.read_timeout)
        })
        .await?;

        tokio::fs::rename(&segment.path, &request.target)
            .await
            .map_err(|e| FetchError::io(&request.target, e))
    }

    /// Check the merged artifact against the declared size
    async fn validate(
        &self,
        target: &Path,
        expected: Option<u64>,
    ) -> std::result::Result<u64, FetchError> {
        let actual = partial_len(target).await?;
        let too_small = match expected.filter(|&e| e > 0) {
            Some(expected) => (actual as f64) < expected as f64 * self.min_size_ratio,
            None => actual == 0,
        };

        if too_small {
            remove_partial(target).await?;
            return Err(FetchError::SizeMismatch {
                expected: expected.unwrap_or(0),
                actual,
            });
        }
        Ok(actual)
    }
}

#[async_trait]
impl CandidateFetcher for SegmentedFetcher {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<u64, FetchError> {
        let total = request.expected_size.unwrap_or(0);
        let tracker = ProgressTracker::new(total, self.progress_interval, request.progress.clone());

        if total > 0 && request.segment_count > 1 {
            self.fetch_segmented(&request, total, &tracker).await?;
        } else {
            self.fetch_single_stream(&request, &tracker).await?;
        }

        let size = self.validate(&request.target, request.expected_size).await?;
        debug!(url = %request.url, size, "Candidate fetched");
        Ok(size)
    }
}

/// Stable per-URL key so partial files are only resumed for the same candidate
fn url_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

fn partial_base(target: &Path, url: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}", url_key(url)));
    target.with_file_name(name)
}

fn segment_path(target: &Path, url: &str, index: usize) -> PathBuf {
    let mut path = partial_base(target, url).into_os_string();
    path.push(format!(".seg{}", index));
    PathBuf::from(path)
}

fn stream_path(target: &Path, url: &str) -> PathBuf {
    let mut path = partial_base(target, url).into_os_string();
    path.push(".part");
    PathBuf::from(path)
}

/// Concatenate segment files in range order into `target`, then delete them
async fn merge_segments(
    segments: &[Segment],
    target: &Path,
) -> std::result::Result<(), FetchError> {
    if let [only] = segments {
        return tokio::fs::rename(&only.path, target)
            .await
            .map_err(|e| FetchError::io(target, e));
    }

    let mut out = tokio::fs::File::create(target)
        .await
        .map_err(|e| FetchError::io(target, e))?;

    for segment in segments {
        let mut part = tokio::fs::File::open(&segment.path)
            .await
            .map_err(|e| FetchError::io(&segment.path, e))?;
        tokio::io::copy(&mut part, &mut out)
            .await
            .map_err(|e| FetchError::io(target, e))?;
    }

    tokio::io::AsyncWriteExt::flush(&mut out)
        .await
        .map_err(|e| FetchError::io(target, e))?;
    drop(out);

    for segment in segments {
        remove_partial(&segment.path).await?;
    }
    Ok(())
}
