//! Byte-range segments and the transfer of a single segment

use super::progress::ProgressTracker;
use crate::error::FetchError;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Inclusive byte range `[start, end]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Split `[0, total)` into `count` contiguous ranges
///
/// The last range absorbs the remainder. `count` is clamped to `1..=total`, and an
/// empty file yields no ranges.
pub fn plan_segments(total: u64, count: usize) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }
    let count = (count.max(1) as u64).min(total);
    let base = total / count;

    (0..count)
        .map(|i| {
            let start = i * base;
            let end = if i + 1 == count {
                total - 1
            } else {
                start + base - 1
            };
            ByteRange { start, end }
        })
        .collect()
}

/// One slice of a candidate transfer, backed by a partial file
///
/// `end` is `None` for the final slice, which reads until the origin's end of file.
/// A whole-file segment (`start == 0`, `end == None`) is a plain single-stream GET.
#[derive(Clone, Debug)]
pub(crate) struct Segment {
    pub(crate) index: usize,
    pub(crate) start: u64,
    pub(crate) end: Option<u64>,
    pub(crate) path: PathBuf,
}

impl Segment {
    pub(crate) fn whole_file(path: PathBuf) -> Self {
        Self {
            index: 0,
            start: 0,
            end: None,
            path,
        }
    }

    fn is_whole_file(&self) -> bool {
        self.start == 0 && self.end.is_none()
    }

    /// Bytes the segment should hold once complete, if bounded
    fn bounded_len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start + 1)
    }

    fn range_header(&self, offset: u64) -> Option<String> {
        let from = self.start + offset;
        match self.end {
            Some(end) => Some(format!("bytes={}-{}", from, end)),
            None if from == 0 => None,
            None => Some(format!("bytes={}-", from)),
        }
    }
}

/// Parsed `Content-Range: bytes <first>-<last>/<total>` header
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub(crate) range: Option<(u64, u64)>,
    pub(crate) total: Option<u64>,
}

pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;

    let range = match range.trim() {
        "*" => None,
        r => {
            let (first, last) = r.split_once('-')?;
            let first: u64 = first.trim().parse().ok()?;
            let last: u64 = last.trim().parse().ok()?;
            if last < first {
                return None;
            }
            Some((first, last))
        }
    };
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };

    Some(ContentRange { range, total })
}

/// Length of the partial file on disk, 0 if it does not exist
pub(crate) async fn partial_len(path: &Path) -> Result<u64, FetchError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(FetchError::io(path, e)),
    }
}

/// One request for one segment, resuming from whatever is already on disk
pub(crate) async fn transfer_segment(
    client: &reqwest::Client,
    url: &str,
    segment: &Segment,
    tracker: &ProgressTracker,
    read_timeout: Duration,
) -> Result<(), FetchError> {
    let mut existing = partial_len(&segment.path).await?;

    if let Some(len) = segment.bounded_len() {
        if existing == len {
            return Ok(());
        }
        if existing > len {
            debug!(path = %segment.path.display(), existing, len, "Discarding oversized partial segment");
            remove_partial(&segment.path).await?;
            tracker.rewind(existing);
            existing = 0;
        }
    }

    let mut request = client.get(url);
    if let Some(range) = segment.range_header(existing) {
        request = request.header(RANGE, range);
    }
    // Bounds the wait for response headers; body reads have their own idle timeout below
    let response = match tokio::time::timeout(read_timeout, request.send()).await {
        Ok(response) => response?,
        Err(_) => {
            return Err(FetchError::Timeout(format!(
                "no response headers within {}s",
                read_timeout.as_secs()
            )));
        }
    };
    let status = response.status();

    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range);

    let mut truncate = false;
    let promised = match status {
        StatusCode::PARTIAL_CONTENT => {
            promised_partial_len(segment, existing, content_range.as_ref(), response.content_length())?
        }
        StatusCode::OK if segment.is_whole_file() => {
            if existing > 0 {
                // Origin restarted from byte zero
                tracker.rewind(existing);
                existing = 0;
                truncate = true;
            }
            response.content_length()
        }
        StatusCode::OK => return Err(FetchError::RangesIgnored),
        StatusCode::RANGE_NOT_SATISFIABLE
            if content_range
                .as_ref()
                .and_then(|cr| cr.total)
                .is_some_and(|total| total <= segment.start + existing) =>
        {
            // Complete on disk, or past the end of a file smaller than declared
            debug!(path = %segment.path.display(), start = segment.start, existing, "Segment lies at or past end of file");
            drop(open_partial(&segment.path, false).await?);
            return Ok(());
        }
        other => {
            return Err(FetchError::HttpStatus {
                status: other.as_u16(),
            });
        }
    };

    let mut file = open_partial(&segment.path, truncate).await?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    loop {
        let next = match tokio::time::timeout(read_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                file.flush().await.map_err(|e| FetchError::io(&segment.path, e))?;
                return Err(FetchError::Timeout(format!(
                    "no data received for {}s",
                    read_timeout.as_secs()
                )));
            }
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                file.flush().await.map_err(|err| FetchError::io(&segment.path, err))?;
                return Err(match promised {
                    Some(expected) => {
                        debug!(error = %e, "Body stream ended with an error");
                        FetchError::StreamTruncated { expected, received }
                    }
                    None => FetchError::from(e),
                });
            }
            None => break,
        };

        let len = chunk.len() as u64;
        if let Some(expected) = promised
            && received + len > expected
        {
            return Err(FetchError::ContentLengthMismatch {
                requested: expected,
                declared: received + len,
            });
        }

        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(&segment.path, e))?;
        received += len;
        tracker.add(len).await;
    }

    file.flush().await.map_err(|e| FetchError::io(&segment.path, e))?;

    if let Some(expected) = promised
        && received < expected
    {
        return Err(FetchError::StreamTruncated { expected, received });
    }

    Ok(())
}

/// Bytes a 206 answer must carry for this segment
fn promised_partial_len(
    segment: &Segment,
    existing: u64,
    content_range: Option<&ContentRange>,
    content_length: Option<u64>,
) -> Result<Option<u64>, FetchError> {
    let from = segment.start + existing;
    let requested = segment.end.map(|end| end - from + 1);

    let mut reaches_eof = false;
    let promised = match content_range.and_then(|cr| cr.range.map(|r| (r, cr.total))) {
        Some(((first, last), total)) => {
            let declared = last - first + 1;
            if first != from {
                return Err(FetchError::ContentLengthMismatch {
                    requested: requested.unwrap_or(declared),
                    declared,
                });
            }
            reaches_eof = total == Some(last + 1);
            Some(declared)
        }
        None => content_length,
    };

    if let (Some(promised), Some(length)) = (promised, content_length)
        && promised != length
    {
        return Err(FetchError::ContentLengthMismatch {
            requested: promised,
            declared: length,
        });
    }

    match (requested, promised) {
        // A short answer that ends at the origin's end of file is complete
        (Some(requested), Some(declared)) if declared < requested && reaches_eof => {
            Ok(Some(declared))
        }
        (Some(requested), Some(declared)) if declared != requested => {
            Err(FetchError::ContentLengthMismatch {
                requested,
                declared,
            })
        }
        (Some(requested), None) => Ok(Some(requested)),
        (_, promised) => Ok(promised),
    }
}

async fn open_partial(path: &Path, truncate: bool) -> Result<tokio::fs::File, FetchError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(path).await.map_err(|e| FetchError::io(path, e))
}

pub(crate) async fn remove_partial(path: &Path) -> Result<(), FetchError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FetchError::io(path, e)),
    }
}
