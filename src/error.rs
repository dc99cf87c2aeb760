//! Error types for sharelink-dl
//!
//! The taxonomy follows the pipeline stages:
//! - [`ResolutionError`] - the resolution service could not produce file descriptors
//! - [`FetchError`] - one candidate URL could not be fetched into an artifact
//! - [`EscalationExhausted`] - every candidate for a file failed
//! - [`DeliveryError`] - the messaging transport refused a send
//!
//! Only [`EscalationExhausted`] and [`DeliveryError`] are surfaced to users; the
//! orchestrator reports them per file and never aborts sibling files.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::DestinationId;

/// Result type alias for sharelink-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sharelink-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.segment_count")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Share link could not be resolved
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// A single candidate fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Every candidate for a file failed
    #[error(transparent)]
    Exhausted(#[from] EscalationExhausted),

    /// The messaging transport refused a delivery
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors produced while resolving a share link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The service answered with a failure status, a failure flag, or no usable files
    #[error("resolution service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a body that could not be decoded
    #[error("malformed resolution payload: {0}")]
    Malformed(String),
}

/// Errors produced while fetching one candidate URL
#[derive(Debug, Error)]
pub enum FetchError {
    /// Origin answered with an unexpected status
    #[error("HTTP status {status} from origin")]
    HttpStatus {
        /// The status code returned by the origin
        status: u16,
    },

    /// Connecting or reading timed out
    #[error("timed out: {0}")]
    Timeout(String),

    /// The body ended before the requested range was received
    #[error("stream truncated: expected {expected} bytes, received {received}")]
    StreamTruncated {
        /// Bytes requested for the range
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// The origin declared or sent more bytes than the requested range
    #[error("content length mismatch: requested {requested} bytes, origin declared {declared}")]
    ContentLengthMismatch {
        /// Bytes requested for the range
        requested: u64,
        /// Bytes declared or delivered by the origin
        declared: u64,
    },

    /// The merged artifact is smaller than the tolerated fraction of the expected size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Size reported by the resolution service
        expected: u64,
        /// Size of the merged artifact
        actual: u64,
    },

    /// The origin answered a partial range request with the whole body
    #[error("origin ignores byte ranges")]
    RangesIgnored,

    /// Connection-level failure (refused, reset, TLS, redirect loop)
    #[error("transport error: {0}")]
    Transport(String),

    /// Local scratch file I/O failed
    #[error("scratch I/O error at {path}: {source}")]
    Io {
        /// Scratch path involved in the failure
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Wrap an I/O error with the scratch path it occurred on
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::HttpStatus {
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Every escalation stage for one file failed
#[derive(Debug, Error)]
#[error("all download attempts failed for {name} ({} causes)", causes.len())]
pub struct EscalationExhausted {
    /// File name of the descriptor that could not be fetched
    pub name: String,
    /// One cause per attempted candidate, in attempt order
    pub causes: Vec<FetchError>,
    /// Why the refresh stage could not produce new candidates, if it was reached
    pub refresh_failure: Option<RefreshFailure>,
}

impl EscalationExhausted {
    /// One-line summary of the attempted stages, suitable for a user message
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self.causes.iter().map(ToString::to_string).collect();
        if let Some(refresh) = &self.refresh_failure {
            parts.push(refresh.to_string());
        }
        if parts.is_empty() {
            return "no download candidates available".to_string();
        }
        parts.join("; ")
    }
}

/// Why the resolver re-query during escalation did not yield new candidates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshFailure {
    /// Re-resolving the share link failed
    #[error("refresh failed: {0}")]
    Resolution(ResolutionError),

    /// Re-resolution succeeded but no file carried the same name
    #[error("refresh did not return {0}")]
    NameNotFound(String),
}

/// Errors produced by the messaging transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The transport accepted the connection but refused the payload
    #[error("transport rejected delivery: {0}")]
    TransportRejected(String),

    /// The destination could not be reached (unknown chat, kicked, network)
    #[error("destination {destination} unreachable: {reason}")]
    DestinationUnreachable {
        /// The destination that could not be reached
        destination: DestinationId,
        /// Transport-provided reason
        reason: String,
    },
}
