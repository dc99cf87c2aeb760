//! Common test utilities for sharelink-dl integration tests

#[allow(dead_code)]
pub mod origin;
#[allow(dead_code)]
pub mod transport;

#[allow(unused_imports)]
pub use origin::*;
pub use transport::*;

use sharelink_dl::Config;
use std::path::Path;
use std::time::Duration;

/// Config pointing at a mock resolver, with state kept under `dir`
///
/// Retries are fast so failing candidates do not slow the suite down.
pub fn test_config(dir: &Path, resolver_uri: &str) -> Config {
    let mut config = Config::default();
    config.resolver.endpoint = format!("{}/api/resolve", resolver_uri);
    config.resolver.timeout = Duration::from_secs(5);
    config.download.scratch_dir = dir.join("scratch");
    config.download.max_concurrent_downloads = 4;
    config.download.read_timeout = Duration::from_secs(5);
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.persistence.database_path = dir.join("state.db");
    config
}

/// Number of entries left in the scratch directory
pub fn scratch_entries(config: &Config) -> usize {
    std::fs::read_dir(config.scratch_dir())
        .map(|entries| entries.count())
        .unwrap_or(0)
}
