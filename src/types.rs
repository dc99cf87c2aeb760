//! Core types for sharelink-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a chat, channel, or user the transport can deliver to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub i64);

impl DestinationId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DestinationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned handle of a message that can later be edited or deleted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(pub i64);

/// One downloadable item returned by the resolution service
///
/// A fresh instance is produced on every resolution; descriptors are never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// File name, used as deduplication key and final filename
    pub name: String,
    /// Expected size in bytes (may be an estimate; 0 = unknown)
    pub expected_size_bytes: u64,
    /// Candidate download URLs, highest priority first
    pub candidate_urls: Vec<String>,
}

impl FileDescriptor {
    /// Expected size if the resolver declared one
    pub fn declared_size(&self) -> Option<u64> {
        (self.expected_size_bytes > 0).then_some(self.expected_size_bytes)
    }
}

/// A completed, merged, size-validated local file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Name from the descriptor (display name for delivery)
    pub name: String,
    /// Location of the merged file inside the scratch directory
    pub path: PathBuf,
    /// Size of the merged file in bytes
    pub size_bytes: u64,
}

/// Where a request came from; decides primary delivery and broadcast eligibility
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// A regular user awaiting personal delivery
    User,
    /// An admin awaiting personal delivery; results may be broadcast
    Admin,
    /// A post in a watched channel; results are only broadcast
    Channel,
}

impl RequestOrigin {
    /// Whether a requester awaits a personal copy of the artifact
    pub fn is_direct(&self) -> bool {
        matches!(self, RequestOrigin::User | RequestOrigin::Admin)
    }
}

/// Which feature flag governs a broadcast
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastKind {
    /// Broadcast of admin-submitted files
    Admin,
    /// Broadcast of channel-sourced files
    Channel,
}

/// A share link submitted for processing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// The share link to resolve
    pub share_link: String,
    /// Chat the request arrived in; receives personal deliveries and error reports
    pub chat: DestinationId,
    /// Origin of the request
    pub origin: RequestOrigin,
    /// Message to reply to when delivering the artifact
    pub reply_to: Option<MessageHandle>,
}

/// Transfer progress snapshot passed to progress reporters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// Bytes written to scratch so far (including resumed bytes)
    pub bytes_downloaded: u64,
    /// Total bytes expected (0 when unknown)
    pub total_bytes: u64,
    /// Seconds since the fetch started
    pub elapsed_secs: f64,
}

impl Progress {
    /// Completion percentage, or `None` when the total is unknown
    pub fn percent(&self) -> Option<f64> {
        (self.total_bytes > 0)
            .then(|| self.bytes_downloaded as f64 / self.total_bytes as f64 * 100.0)
    }

    /// Average throughput in bytes per second since the fetch started
    pub fn speed_bps(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.bytes_downloaded as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Why a descriptor was not processed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// File extension is not on the media allow-list
    NotMedia,
    /// Expected size exceeds the configured ceiling
    TooLarge {
        /// Size declared by the resolver
        size_bytes: u64,
        /// Configured ceiling
        limit_bytes: u64,
    },
}

/// Terminal outcome of one descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOutcome {
    /// Rejected by the media filter before any fetch
    Rejected(RejectReason),
    /// Fetched; delivery results attached
    Delivered {
        /// Result of the personal delivery, `None` if not attempted
        primary: Option<bool>,
        /// Number of broadcast destinations that received the artifact
        broadcast: usize,
    },
    /// Fetching failed or the task aborted; user-visible message attached
    Failed(String),
}

/// Outcome of one descriptor within a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    /// File name from the descriptor
    pub name: String,
    /// What happened to it
    pub outcome: FileOutcome,
}

/// Outcome of one request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestReport {
    /// The share link that was processed
    pub share_link: String,
    /// Whether the request was skipped because its origin is muted
    pub ignored: bool,
    /// Resolution failure, if the link could not be resolved
    pub resolution_error: Option<String>,
    /// One report per descriptor returned by the resolver
    pub files: Vec<FileReport>,
}

impl RequestReport {
    /// Number of files that were fetched successfully
    pub fn delivered_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Delivered { .. }))
            .count()
    }
}

/// Event emitted during request processing
///
/// Consumers subscribe through [`crate::Orchestrator::subscribe`].
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Share link resolved into descriptors
    Resolved {
        /// The share link
        share_link: String,
        /// Number of descriptors returned
        files: usize,
    },
    /// A descriptor was rejected by the media filter
    Rejected {
        /// File name
        name: String,
        /// Why it was rejected
        reason: RejectReason,
    },
    /// An escalation stage started fetching a candidate
    Attempt {
        /// File name
        name: String,
        /// Stage label (primary, secondary, refreshed-0, ...)
        stage: String,
    },
    /// Throttled transfer progress
    Downloading {
        /// File name
        name: String,
        /// Progress snapshot
        progress: Progress,
    },
    /// Artifact fetched and validated
    Downloaded {
        /// File name
        name: String,
        /// Artifact size in bytes
        size_bytes: u64,
    },
    /// Personal delivery finished
    Delivered {
        /// File name
        name: String,
        /// Recipient chat
        destination: DestinationId,
        /// Whether the transport accepted it
        success: bool,
    },
    /// Broadcast fan-out finished
    Broadcast {
        /// File name
        name: String,
        /// Destinations that received the artifact
        delivered: usize,
    },
    /// Descriptor processing failed
    Failed {
        /// File name
        name: String,
        /// User-visible error
        error: String,
    },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_size_treats_zero_as_unknown() {
        let mut d = FileDescriptor {
            name: "a.mp4".into(),
            expected_size_bytes: 0,
            candidate_urls: vec![],
        };
        assert_eq!(d.declared_size(), None);

        d.expected_size_bytes = 42;
        assert_eq!(d.declared_size(), Some(42));
    }

    #[test]
    fn progress_percent_and_speed() {
        let p = Progress {
            bytes_downloaded: 50,
            total_bytes: 200,
            elapsed_secs: 5.0,
        };
        assert_eq!(p.percent(), Some(25.0));
        assert_eq!(p.speed_bps(), 10.0);

        let unknown = Progress {
            bytes_downloaded: 50,
            total_bytes: 0,
            elapsed_secs: 0.0,
        };
        assert_eq!(unknown.percent(), None);
        assert_eq!(unknown.speed_bps(), 0.0);
    }

    #[test]
    fn only_user_and_admin_are_direct() {
        assert!(RequestOrigin::User.is_direct());
        assert!(RequestOrigin::Admin.is_direct());
        assert!(!RequestOrigin::Channel.is_direct());
    }

    #[test]
    fn reject_reason_serializes_with_tag() {
        let json = serde_json::to_value(RejectReason::TooLarge {
            size_bytes: 10,
            limit_bytes: 5,
        })
        .unwrap();

        assert_eq!(json["reason"], "too_large");
        assert_eq!(json["limit_bytes"], 5);
    }

    #[test]
    fn delivered_count_ignores_failures_and_rejections() {
        let report = RequestReport {
            share_link: "https://example.com/s/1".into(),
            files: vec![
                FileReport {
                    name: "a.mp4".into(),
                    outcome: FileOutcome::Delivered {
                        primary: Some(true),
                        broadcast: 0,
                    },
                },
                FileReport {
                    name: "b.mp4".into(),
                    outcome: FileOutcome::Failed("x".into()),
                },
                FileReport {
                    name: "c.txt".into(),
                    outcome: FileOutcome::Rejected(RejectReason::NotMedia),
                },
            ],
            ..Default::default()
        };

        assert_eq!(report.delivered_count(), 1);
    }
}
