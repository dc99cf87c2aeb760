//! Fallback escalation across candidate URLs
//!
//! One descriptor moves through a fixed sequence of [`Stage`]s until a fetch
//! succeeds or the sequence runs out:
//!
//! 1. `Primary` fetches the first candidate URL
//! 2. `Secondary` fetches the second candidate URL
//! 3. `Refresh` re-resolves the share link and looks the file up by name
//! 4. `Refreshed(i)` fetches the refreshed candidates in order
//!
//! Stages without a URL are skipped and do not count as failures. Failed fetches
//! are expected control flow here; they are collected and returned together if
//! every stage fails.

use crate::error::{EscalationExhausted, FetchError, RefreshFailure};
use crate::fetcher::{CandidateFetcher, FetchRequest, ProgressReporter};
use crate::resolver::LinkResolver;
use crate::types::{Artifact, Event, FileDescriptor};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Escalation stage for one descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// First candidate of the original descriptor
    Primary,
    /// Second candidate of the original descriptor
    Secondary,
    /// Re-query of the resolution service
    Refresh,
    /// Candidate `i` of the refreshed descriptor
    Refreshed(usize),
}

impl Stage {
    /// Stage that follows this one when it failed or was skipped
    ///
    /// `refreshed_candidates` is the number of candidate URLs the refresh produced.
    /// `None` means the descriptor is exhausted.
    pub fn next(self, refreshed_candidates: usize) -> Option<Stage> {
        match self {
            Stage::Primary => Some(Stage::Secondary),
            Stage::Secondary => Some(Stage::Refresh),
            Stage::Refresh if refreshed_candidates > 0 => Some(Stage::Refreshed(0)),
            Stage::Refresh => None,
            Stage::Refreshed(i) if i + 1 < refreshed_candidates => Some(Stage::Refreshed(i + 1)),
            Stage::Refreshed(_) => None,
        }
    }

    /// Short label used in logs and events
    pub fn label(&self) -> String {
        match self {
            Stage::Primary => "primary".to_string(),
            Stage::Secondary => "secondary".to_string(),
            Stage::Refresh => "refresh".to_string(),
            Stage::Refreshed(i) => format!("refreshed-{}", i),
        }
    }

    fn candidate<'a>(
        &self,
        original: &'a FileDescriptor,
        refreshed: Option<&'a FileDescriptor>,
    ) -> Option<&'a str> {
        let url = match self {
            Stage::Primary => original.candidate_urls.first(),
            Stage::Secondary => original.candidate_urls.get(1),
            Stage::Refresh => None,
            Stage::Refreshed(i) => refreshed.and_then(|d| d.candidate_urls.get(*i)),
        };
        url.map(String::as_str)
    }
}

/// Drives the escalation stages for one descriptor at a time
pub struct FallbackEscalator {
    resolver: Arc<dyn LinkResolver>,
    fetcher: Arc<dyn CandidateFetcher>,
    segment_count: usize,
    events: Option<broadcast::Sender<Event>>,
}

impl FallbackEscalator {
    /// Create an escalator over the given resolver and fetcher
    pub fn new(
        resolver: Arc<dyn LinkResolver>,
        fetcher: Arc<dyn CandidateFetcher>,
        segment_count: usize,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            segment_count,
            events: None,
        }
    }

    /// Emit an [`Event::Attempt`] on this channel before each fetch
    pub fn with_events(mut self, events: broadcast::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Fetch `descriptor` into `target`, escalating through all stages
    ///
    /// Stages run strictly one after another; the refresh stage is only reached
    /// once both original candidates have failed or were absent.
    pub async fn run(
        &self,
        share_link: &str,
        descriptor: &FileDescriptor,
        target: &Path,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<Artifact, EscalationExhausted> {
        let mut stage = Stage::Primary;
        let mut causes: Vec<FetchError> = Vec::new();
        let mut refreshed: Option<FileDescriptor> = None;

        loop {
            if stage == Stage::Refresh {
                info!(file = %descriptor.name, "Direct candidates failed, refreshing links");
                match self.refresh(share_link, &descriptor.name).await {
                    Ok(fresh) => refreshed = Some(fresh),
                    Err(failure) => {
                        warn!(file = %descriptor.name, error = %failure, "Link refresh failed");
                        return Err(EscalationExhausted {
                            name: descriptor.name.clone(),
                            causes,
                            refresh_failure: Some(failure),
                        });
                    }
                }
            } else if let Some(url) = stage.candidate(descriptor, refreshed.as_ref()) {
                // Refreshed sizes replace the original estimate
                let expected_size = refreshed
                    .as_ref()
                    .filter(|_| matches!(stage, Stage::Refreshed(_)))
                    .unwrap_or(descriptor)
                    .declared_size();

                info!(file = %descriptor.name, stage = %stage.label(), url, "Attempting download");
                if let Some(events) = &self.events {
                    events
                        .send(Event::Attempt {
                            name: descriptor.name.clone(),
                            stage: stage.label(),
                        })
                        .ok();
                }

                let request = FetchRequest {
                    url: url.to_string(),
                    target: target.to_path_buf(),
                    expected_size,
                    segment_count: self.segment_count,
                    progress: progress.clone(),
                };
                match self.fetcher.fetch(request).await {
                    Ok(size_bytes) => {
                        return Ok(Artifact {
                            name: descriptor.name.clone(),
                            path: target.to_path_buf(),
                            size_bytes,
                        });
                    }
                    Err(e) => {
                        warn!(file = %descriptor.name, stage = %stage.label(), error = %e, "Download stage failed");
                        causes.push(e);
                    }
                }
            } else {
                debug!(file = %descriptor.name, stage = %stage.label(), "No candidate for stage, skipping");
            }

            let refreshed_count = refreshed.as_ref().map_or(0, |d| d.candidate_urls.len());
            match stage.next(refreshed_count) {
                Some(next) => stage = next,
                None => {
                    return Err(EscalationExhausted {
                        name: descriptor.name.clone(),
                        causes,
                        refresh_failure: None,
                    });
                }
            }
        }
    }

    async fn refresh(&self, share_link: &str, name: &str) -> Result<FileDescriptor, RefreshFailure> {
        let files = self
            .resolver
            .resolve(share_link)
            .await
            .map_err(RefreshFailure::Resolution)?;

        files
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| RefreshFailure::NameNotFound(name.to_string()))
    }
}
