//! # sharelink-dl
//!
//! Resilient downloader for files behind cloud-storage share links.
//!
//! A share link is resolved into file descriptors, each file is fetched with
//! concurrent byte-range segments that resume after truncation, failed candidates
//! escalate through fallback URLs and a link refresh, and finished files are
//! delivered to the requester and optionally fanned out to broadcast destinations
//! with name-based deduplication.
//!
//! The chat transport is supplied by the embedding process through the
//! [`Transport`] trait; settings, the broadcast ledger and the admin roster live
//! in SQLite ([`Database`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use sharelink_dl::{Config, Orchestrator, Request, RequestOrigin, DestinationId, Transport};
//! use std::sync::Arc;
//!
//! async fn run(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.resolver.endpoint = "https://resolver.example.com/api".to_string();
//!
//!     let (orchestrator, _db) = Orchestrator::open(config, transport).await?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = orchestrator
//!         .process_request(Request {
//!             share_link: "https://terabox.com/s/1abcdef".to_string(),
//!             chat: DestinationId(42),
//!             origin: RequestOrigin::User,
//!             reply_to: None,
//!         })
//!         .await?;
//!     println!("delivered {} file(s)", report.delivered_count());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Artifact delivery and deduplicated broadcast
pub mod delivery;
/// Error types
pub mod error;
/// Fallback escalation across candidate URLs
pub mod escalation;
/// Segmented, resumable HTTP fetching
pub mod fetcher;
/// Request orchestration
pub mod orchestrator;
/// Share link resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Global bound on concurrent downloads
pub mod scheduler;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ConfigStore, GlobalConfig};
pub use db::Database;
pub use delivery::{DeliveryDispatcher, DeliveryLedger, Transport};
pub use error::{
    DatabaseError, DeliveryError, Error, EscalationExhausted, FetchError, ResolutionError, Result,
};
pub use escalation::{FallbackEscalator, Stage};
pub use fetcher::{CandidateFetcher, FetchRequest, ProgressReporter, SegmentedFetcher};
pub use orchestrator::Orchestrator;
pub use resolver::{HttpLinkResolver, LinkResolver};
pub use scheduler::DownloadScheduler;
pub use types::{
    Artifact, DestinationId, Event, FileDescriptor, FileOutcome, FileReport, MessageHandle,
    Progress, RejectReason, Request, RequestOrigin, RequestReport,
};

/// Helper function to run the orchestrator with graceful signal handling.
///
/// Waits for a termination signal and then calls the orchestrator's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use sharelink_dl::{Config, Orchestrator, Transport, run_with_shutdown};
/// use std::sync::Arc;
///
/// async fn serve(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = Config::default();
///     config.resolver.endpoint = "https://resolver.example.com/api".to_string();
///     let (orchestrator, _db) = Orchestrator::open(config, transport).await?;
///
///     // Hand `orchestrator.clone()` to the chat layer, then block until a signal
///     run_with_shutdown(orchestrator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
