//! Configuration types for sharelink-dl
//!
//! [`Config`] is the static process configuration. [`GlobalConfig`] is the
//! runtime-editable state held by the configuration store; the orchestrator reads
//! one snapshot of it per request.

use crate::error::{Error, Result};
use crate::types::DestinationId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Resolution service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Endpoint queried as `GET <endpoint>?url=<share link>`
    #[serde(default)]
    pub endpoint: String,

    /// Whole-request timeout for resolver calls (default: 30 seconds)
    #[serde(default = "default_resolver_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_resolver_timeout(),
        }
    }
}

/// Transfer behavior (scratch space, concurrency, segmenting, timeouts)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Scratch directory for partial segments and merged artifacts (default: "./scratch")
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Maximum concurrent whole-file downloads across all requests (default: 50)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Number of parallel byte-range segments per candidate fetch (default: 4)
    #[serde(default = "default_segment_count")]
    pub segment_count: usize,

    /// TCP/TLS connect timeout for origin requests (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Maximum idle time waiting for the next body chunk (default: 60 seconds)
    ///
    /// The transfer as a whole is unbounded; only a stalled peer is cut off.
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// Minimum interval between progress reports (default: 5 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Smallest accepted fraction of the declared size (default: 0.9)
    #[serde(default = "default_min_size_ratio")]
    pub min_size_ratio: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            segment_count: default_segment_count(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            progress_interval: default_progress_interval(),
            min_size_ratio: default_min_size_ratio(),
        }
    }
}

/// Retry configuration for segment-level failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per segment, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Which resolved files are accepted for download
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaFilterConfig {
    /// Accepted file extensions, lowercase without the dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for MediaFilterConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding global config, ledger and admins (default: "./sharelink-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Runtime-editable settings owned by the configuration store
///
/// The orchestrator takes one snapshot per request so that a settings change
/// never affects a request halfway through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Broadcast files submitted by admins
    #[serde(default)]
    pub admin_broadcast_enabled: bool,

    /// Process channel posts and broadcast their files
    #[serde(default)]
    pub channel_broadcast_enabled: bool,

    /// Ordered broadcast destinations
    #[serde(default)]
    pub destination_set: Vec<DestinationId>,

    /// Largest accepted file (default: 2 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            admin_broadcast_enabled: false,
            channel_broadcast_enabled: false,
            destination_set: Vec::new(),
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

/// Source of [`GlobalConfig`] snapshots
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current settings; callers keep the returned snapshot for one whole request
    async fn global_config(&self) -> Result<GlobalConfig>;
}

/// Main configuration for the orchestrator
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolution service settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Transfer settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Segment retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Media acceptance rules
    #[serde(default)]
    pub media: MediaFilterConfig,

    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Values written to the configuration store on first start
    #[serde(default)]
    pub defaults: GlobalConfig,
}

impl Config {
    /// Scratch directory
    pub fn scratch_dir(&self) -> &PathBuf {
        &self.download.scratch_dir
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.resolver.endpoint.trim().is_empty() {
            return Err(Error::config(
                "resolver.endpoint",
                "resolution service endpoint must be set",
            ));
        }
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "download.max_concurrent_downloads",
                "must allow at least one concurrent download",
            ));
        }
        if self.download.segment_count == 0 {
            return Err(Error::config(
                "download.segment_count",
                "must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        let ratio = self.download.min_size_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::config(
                "download.min_size_ratio",
                format!("must be within (0, 1], got {ratio}"),
            ));
        }
        Ok(())
    }
}

fn default_resolver_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./scratch")
}

fn default_max_concurrent() -> usize {
    50
}

fn default_segment_count() -> usize {
    4
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_min_size_ratio() -> f64 {
    0.9
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_allowed_extensions() -> Vec<String> {
    ["mp4", "mkv", "avi", "mov", "webm"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./sharelink-dl.db")
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            resolver: ResolverConfig {
                endpoint: "https://resolver.example/api".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.download.max_concurrent_downloads, 50);
        assert_eq!(config.download.progress_interval, Duration::from_secs(5));
        assert_eq!(config.download.min_size_ratio, 0.9);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(2));
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.defaults.max_file_size_bytes, 2 * 1024 * 1024 * 1024);
        assert!(!config.defaults.admin_broadcast_enabled);
        assert!(!config.defaults.channel_broadcast_enabled);
        assert_eq!(
            config.media.allowed_extensions,
            vec!["mp4", "mkv", "avi", "mov", "webm"]
        );
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.download.segment_count, 4);
        assert_eq!(config.download.read_timeout, Duration::from_secs(60));
        assert_eq!(config.persistence.database_path, PathBuf::from("./sharelink-dl.db"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(RetryConfig::default()).unwrap();

        assert_eq!(json["initial_delay"], 2);
        assert_eq!(json["max_delay"], 60);
    }

    #[test]
    fn global_config_round_trips_destinations() {
        let global = GlobalConfig {
            destination_set: vec![DestinationId(-1001), DestinationId(42)],
            ..Default::default()
        };

        let json = serde_json::to_string(&global).unwrap();
        assert!(json.contains("[-1001,42]"), "destinations serialize as plain ids: {json}");
        let restored: GlobalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, global);
    }

    #[test]
    fn validate_accepts_defaults_with_endpoint() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn validate_rejects_missing_endpoint() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "resolver.endpoint"));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = valid_config();
        config.download.max_concurrent_downloads = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.download.segment_count = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_size_ratio() {
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            let mut config = valid_config();
            config.download.min_size_ratio = ratio;
            assert!(config.validate().is_err(), "ratio {ratio} should be rejected");
        }
    }
}
