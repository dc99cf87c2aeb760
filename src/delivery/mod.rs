//! Delivery of finished artifacts
//!
//! [`DeliveryDispatcher`] sends an artifact either to the requester
//! ([`deliver_primary`](DeliveryDispatcher::deliver_primary)) or to the configured
//! destination set ([`deliver_broadcast`](DeliveryDispatcher::deliver_broadcast)).
//!
//! Broadcasts are deduplicated by artifact name through a [`DeliveryLedger`]. The
//! lookup, the sends and the ledger inserts are not atomic: two deliveries of the
//! same name running at the same time can both pass the lookup and both send. That
//! costs at most a few duplicate sends and never blocks unrelated transfers.

use crate::config::GlobalConfig;
use crate::error::{DeliveryError, Result};
use crate::types::{Artifact, BroadcastKind, DestinationId, MessageHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Longest error excerpt included in a user-visible message
const ERROR_EXCERPT_CHARS: usize = 100;

/// Messaging transport used for artifacts, status messages and error reports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Upload a file to a destination
    async fn send_artifact(
        &self,
        destination: DestinationId,
        path: &Path,
        display_name: &str,
        reply_to: Option<MessageHandle>,
    ) -> std::result::Result<(), DeliveryError>;

    /// Post a status message, or edit `handle` in place when given
    async fn send_progress(
        &self,
        destination: DestinationId,
        handle: Option<MessageHandle>,
        text: &str,
    ) -> std::result::Result<MessageHandle, DeliveryError>;

    /// Delete a previously posted message
    async fn delete_message(
        &self,
        destination: DestinationId,
        handle: MessageHandle,
    ) -> std::result::Result<(), DeliveryError>;

    /// Send a user-visible error message
    async fn report_error(
        &self,
        destination: DestinationId,
        text: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Append-only record of successful broadcast deliveries
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Whether any destination already received an artifact with this name
    async fn ledger_has(&self, name: &str) -> Result<bool>;

    /// Record one successful broadcast delivery
    async fn ledger_insert(
        &self,
        name: &str,
        destination: DestinationId,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// Sends artifacts to recipients and broadcast destinations
#[derive(Clone)]
pub struct DeliveryDispatcher {
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn DeliveryLedger>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher
    pub fn new(transport: Arc<dyn Transport>, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { transport, ledger }
    }

    /// Send the artifact to one recipient
    ///
    /// A failed send is reported to the recipient and returns `false`; it never
    /// raises further.
    pub async fn deliver_primary(
        &self,
        artifact: &Artifact,
        recipient: DestinationId,
        reply_to: Option<MessageHandle>,
    ) -> bool {
        match self
            .transport
            .send_artifact(recipient, &artifact.path, &artifact.name, reply_to)
            .await
        {
            Ok(()) => {
                info!(file = %artifact.name, chat = %recipient, "Sent artifact to requester");
                true
            }
            Err(e) => {
                error!(file = %artifact.name, chat = %recipient, error = %e, "Failed to send artifact");
                let text = format!(
                    "Failed to send `{}`: {}",
                    artifact.name,
                    excerpt(&e.to_string())
                );
                if let Err(report_err) = self.transport.report_error(recipient, &text).await {
                    warn!(chat = %recipient, error = %report_err, "Failed to report delivery error");
                }
                false
            }
        }
    }

    /// Send the artifact to every broadcast destination
    ///
    /// Skips entirely when the flag for `kind` is off, when the ledger already knows
    /// the artifact name, or when the ledger cannot be read. Destinations are tried
    /// independently; each success is recorded in the ledger. Returns the number of
    /// destinations that received the artifact.
    pub async fn deliver_broadcast(
        &self,
        artifact: &Artifact,
        kind: BroadcastKind,
        config: &GlobalConfig,
    ) -> usize {
        let enabled = match kind {
            BroadcastKind::Admin => config.admin_broadcast_enabled,
            BroadcastKind::Channel => config.channel_broadcast_enabled,
        };
        if !enabled {
            info!(file = %artifact.name, ?kind, "Broadcast disabled, skipping");
            return 0;
        }

        match self.ledger.ledger_has(&artifact.name).await {
            Ok(false) => {}
            Ok(true) => {
                info!(file = %artifact.name, "Already broadcast, skipping duplicate");
                return 0;
            }
            Err(e) => {
                error!(file = %artifact.name, error = %e, "Ledger lookup failed, skipping broadcast");
                return 0;
            }
        }

        if config.destination_set.is_empty() {
            warn!(file = %artifact.name, "No broadcast destinations configured");
            return 0;
        }

        let mut delivered = 0;
        for &destination in &config.destination_set {
            if let Err(e) = self
                .transport
                .send_artifact(destination, &artifact.path, &artifact.name, None)
                .await
            {
                error!(file = %artifact.name, chat = %destination, error = %e, "Broadcast failed for destination");
                continue;
            }

            delivered += 1;
            info!(file = %artifact.name, chat = %destination, "Broadcast artifact");
            if let Err(e) = self
                .ledger
                .ledger_insert(&artifact.name, destination, Utc::now())
                .await
            {
                error!(file = %artifact.name, chat = %destination, error = %e, "Failed to record broadcast");
            }
        }

        info!(
            file = %artifact.name,
            delivered,
            destinations = config.destination_set.len(),
            "Broadcast complete"
        );
        delivered
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(ERROR_EXCERPT_CHARS).collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
