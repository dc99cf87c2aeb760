//! Per-request pipeline: resolve, filter, fetch, deliver.
//!
//! The [`Orchestrator`] struct and its methods are organized by domain:
//! - [`processing`] - request and per-file processing
//! - [`status`] - status message text and the progress reporter that edits it
//! - [`lifecycle`] - startup sweep, task tracking and shutdown

mod lifecycle;
mod processing;
mod status;

use crate::config::{Config, ConfigStore};
use crate::db::Database;
use crate::delivery::{DeliveryDispatcher, DeliveryLedger, Transport};
use crate::error::Result;
use crate::escalation::FallbackEscalator;
use crate::fetcher::{CandidateFetcher, SegmentedFetcher};
use crate::resolver::{HttpLinkResolver, LinkResolver};
use crate::scheduler::DownloadScheduler;
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Capacity of the event channel; slower subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) config: Arc<Config>,
    pub(crate) resolver: Arc<dyn LinkResolver>,
    pub(crate) escalator: Arc<FallbackEscalator>,
    pub(crate) scheduler: DownloadScheduler,
    pub(crate) dispatcher: DeliveryDispatcher,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Cleared by [`shutdown`](Orchestrator::shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) tasks: TaskTracker,
}

impl Orchestrator {
    /// Create an orchestrator from its collaborators
    ///
    /// Validates `config` and removes anything a previous process left in the
    /// scratch directory.
    pub async fn new(
        config: Config,
        resolver: Arc<dyn LinkResolver>,
        fetcher: Arc<dyn CandidateFetcher>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ConfigStore>,
        ledger: Arc<dyn DeliveryLedger>,
    ) -> Result<Self> {
        config.validate()?;
        lifecycle::sweep_scratch(config.scratch_dir()).await?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let escalator = FallbackEscalator::new(
            resolver.clone(),
            fetcher,
            config.download.segment_count,
        )
        .with_events(event_tx.clone());

        let scheduler = DownloadScheduler::new(config.download.max_concurrent_downloads);
        tracing::info!(
            max_concurrent_downloads = scheduler.limit(),
            segment_count = config.download.segment_count,
            "Orchestrator initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            resolver,
            escalator: Arc::new(escalator),
            scheduler,
            dispatcher: DeliveryDispatcher::new(transport.clone(), ledger),
            transport,
            store,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
            cancel_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Create an orchestrator with the HTTP resolver, the segmented fetcher and
    /// the SQLite store at `config.persistence.database_path`
    ///
    /// Writes `config.defaults` to the store when no settings exist yet. The
    /// returned [`Database`] is the same store the orchestrator reads, for the
    /// settings and admin layers of the embedding process.
    pub async fn open(config: Config, transport: Arc<dyn Transport>) -> Result<(Self, Arc<Database>)> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        db.ensure_global_defaults(&config.defaults).await?;

        let resolver = Arc::new(HttpLinkResolver::new(&config.resolver)?);
        let fetcher = Arc::new(SegmentedFetcher::new(&config.download, &config.retry)?);

        let orchestrator =
            Self::new(config, resolver, fetcher, transport, db.clone(), db.clone()).await?;
        Ok((orchestrator, db))
    }

    /// Subscribe to processing events
    ///
    /// Each subscriber receives every event sent after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The static configuration this orchestrator runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
