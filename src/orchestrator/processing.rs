//! Request and per-file processing.

use crate::config::GlobalConfig;
use crate::error::{Error, Result};
use crate::types::{
    Artifact, BroadcastKind, DestinationId, Event, FileDescriptor, FileOutcome, FileReport,
    MessageHandle, RejectReason, Request, RequestOrigin, RequestReport,
};
use crate::utils::{has_allowed_extension, sanitize_filename};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::Orchestrator;
use super::status::{self, StatusReporter};

impl Orchestrator {
    /// Process one share link to completion
    ///
    /// Takes a settings snapshot, resolves the link, rejects ineligible files and
    /// processes the remaining files concurrently. Every user-visible outcome is
    /// sent to `request.chat`; the returned report mirrors them. Fails only when
    /// the settings cannot be read or the orchestrator is shutting down.
    pub async fn process_request(&self, request: Request) -> Result<RequestReport> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let link = request.share_link.clone();
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {
                info!(link = %link, "Request cancelled by shutdown");
                Err(Error::ShuttingDown)
            }
            report = self.run_request(request) => report,
        }
    }

    async fn run_request(&self, request: Request) -> Result<RequestReport> {
        let global = self.store.global_config().await?;
        let mut report = RequestReport {
            share_link: request.share_link.clone(),
            ..Default::default()
        };

        if request.origin == RequestOrigin::Channel && !global.channel_broadcast_enabled {
            info!(link = %request.share_link, chat = %request.chat, "Channel processing disabled, ignoring post");
            report.ignored = true;
            return Ok(report);
        }

        info!(link = %request.share_link, chat = %request.chat, origin = ?request.origin, "Processing share link");

        let descriptors = match self.resolver.resolve(&request.share_link).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!(link = %request.share_link, error = %e, "Failed to retrieve links");
                self.notify(
                    request.chat,
                    &format!("Failed to retrieve links for `{}`", request.share_link),
                )
                .await;
                report.resolution_error = Some(e.to_string());
                return Ok(report);
            }
        };
        self.emit(Event::Resolved {
            share_link: request.share_link.clone(),
            files: descriptors.len(),
        });

        // Rejections are recorded in place; accepted files get a placeholder
        // that the finished task overwrites
        let mut accepted = Vec::new();
        for (index, descriptor) in descriptors.into_iter().enumerate() {
            match self.check_eligible(&descriptor, &global) {
                Ok(()) => {
                    report.files.push(FileReport {
                        name: descriptor.name.clone(),
                        outcome: FileOutcome::Failed("processing was interrupted".to_string()),
                    });
                    accepted.push((index, descriptor));
                }
                Err(reason) => {
                    self.reject(&request, &descriptor, &reason).await;
                    report.files.push(FileReport {
                        name: descriptor.name,
                        outcome: FileOutcome::Rejected(reason),
                    });
                }
            }
        }

        if accepted.is_empty() {
            info!(link = %request.share_link, "No eligible media files");
            self.notify(
                request.chat,
                &format!("No video files found in `{}`", request.share_link),
            )
            .await;
            return Ok(report);
        }

        let request = Arc::new(request);
        let global = Arc::new(global);
        let mut tasks = JoinSet::new();
        for (index, descriptor) in accepted {
            let this = self.clone();
            let request = request.clone();
            let global = global.clone();
            // Tracked so shutdown also waits for aborted file tasks to drop their scratch
            tasks.spawn(self.tasks.track_future(async move {
                let name = descriptor.name.clone();
                let outcome = AssertUnwindSafe(this.process_file(&request, &global, descriptor))
                    .catch_unwind()
                    .await;
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(file = %name, "File task panicked");
                        let text = format!(
                            "Error processing `{}` from `{}`: internal error",
                            name, request.share_link
                        );
                        this.notify(request.chat, &text).await;
                        this.emit(Event::Failed {
                            name: name.clone(),
                            error: text.clone(),
                        });
                        FileOutcome::Failed(text)
                    }
                };
                (index, outcome)
            }));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(file) = report.files.get_mut(index) {
                        file.outcome = outcome;
                    }
                }
                Err(e) => error!(link = %request.share_link, error = %e, "File task failed to join"),
            }
        }

        info!(
            link = %request.share_link,
            files = report.files.len(),
            delivered = report.delivered_count(),
            "Share link processed"
        );
        Ok(report)
    }

    /// Size ceiling first, then the extension allow-list
    pub(crate) fn check_eligible(
        &self,
        descriptor: &FileDescriptor,
        global: &GlobalConfig,
    ) -> std::result::Result<(), RejectReason> {
        if let Some(size_bytes) = descriptor.declared_size()
            && size_bytes > global.max_file_size_bytes
        {
            return Err(RejectReason::TooLarge {
                size_bytes,
                limit_bytes: global.max_file_size_bytes,
            });
        }
        if !has_allowed_extension(&descriptor.name, &self.config.media.allowed_extensions) {
            return Err(RejectReason::NotMedia);
        }
        Ok(())
    }

    async fn reject(&self, request: &Request, descriptor: &FileDescriptor, reason: &RejectReason) {
        let text = match reason {
            RejectReason::TooLarge {
                size_bytes,
                limit_bytes,
            } => {
                warn!(file = %descriptor.name, size_bytes, limit_bytes, "File exceeds size limit");
                status::too_large_text(&descriptor.name, *size_bytes, *limit_bytes)
            }
            RejectReason::NotMedia => {
                info!(file = %descriptor.name, "Skipping non-media file");
                status::not_media_text(&descriptor.name)
            }
        };
        self.notify(request.chat, &text).await;
        self.emit(Event::Rejected {
            name: descriptor.name.clone(),
            reason: reason.clone(),
        });
    }

    /// Fetch one file through every escalation stage, then deliver it
    ///
    /// The scratch directory holding the artifact is removed on every exit path.
    async fn process_file(
        &self,
        request: &Request,
        global: &GlobalConfig,
        descriptor: FileDescriptor,
    ) -> FileOutcome {
        let name = descriptor.name.clone();
        let status = self.post_status(request.chat, &status::processing_text(&name)).await;

        let slot = match self.scheduler.acquire_slot().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!(file = %name, error = %e, "No download slot");
                if let Some(handle) = status
                    && let Err(e) = self.transport.delete_message(request.chat, handle).await
                {
                    debug!(file = %name, error = %e, "Failed to delete status message");
                }
                return FileOutcome::Failed(e.to_string());
            }
        };
        if let Some(handle) = status {
            self.edit_status(request.chat, handle, &status::found_text(&name)).await;
        }

        let scratch = match tempfile::Builder::new()
            .prefix("dl-")
            .tempdir_in(self.config.scratch_dir())
        {
            Ok(dir) => dir,
            Err(e) => {
                error!(file = %name, error = %e, "Failed to create scratch directory");
                let text = format!(
                    "Error processing `{}` from `{}`: {}",
                    name, request.share_link, e
                );
                self.notify(request.chat, &text).await;
                self.emit(Event::Failed {
                    name,
                    error: text.clone(),
                });
                return FileOutcome::Failed(text);
            }
        };
        let target = scratch.path().join(sanitize_filename(&name));

        let reporter = Arc::new(StatusReporter {
            transport: self.transport.clone(),
            chat: request.chat,
            handle: status,
            name: name.clone(),
            events: self.event_tx.clone(),
        });

        let fetched = self
            .escalator
            .run(&request.share_link, &descriptor, &target, Some(reporter))
            .await;
        // The slot covers fetching only; delivery does not hold it
        drop(slot);

        let outcome = match fetched {
            Ok(artifact) => {
                info!(file = %name, size_bytes = artifact.size_bytes, "Download complete");
                if let Some(handle) = status
                    && let Err(e) = self.transport.delete_message(request.chat, handle).await
                {
                    debug!(file = %name, error = %e, "Failed to delete status message");
                }
                self.emit(Event::Downloaded {
                    name: name.clone(),
                    size_bytes: artifact.size_bytes,
                });
                self.deliver(request, global, &artifact).await
            }
            Err(exhausted) => {
                error!(file = %name, error = %exhausted, causes = %exhausted.summary(), "Download exhausted all candidates");
                if let Some(handle) = status {
                    self.edit_status(request.chat, handle, &status::download_failed_text(&name))
                        .await;
                }
                let text = format!(
                    "Failed to download `{}` from `{}`: {}",
                    name,
                    request.share_link,
                    exhausted.summary()
                );
                self.notify(request.chat, &text).await;
                self.emit(Event::Failed {
                    name: name.clone(),
                    error: text.clone(),
                });
                FileOutcome::Failed(text)
            }
        };

        if let Err(e) = scratch.close() {
            warn!(file = %name, error = %e, "Failed to remove scratch directory");
        }
        outcome
    }

    async fn deliver(
        &self,
        request: &Request,
        global: &GlobalConfig,
        artifact: &Artifact,
    ) -> FileOutcome {
        let primary = if request.origin.is_direct() {
            let success = self
                .dispatcher
                .deliver_primary(artifact, request.chat, request.reply_to)
                .await;
            self.emit(Event::Delivered {
                name: artifact.name.clone(),
                destination: request.chat,
                success,
            });
            Some(success)
        } else {
            None
        };

        let kind = match request.origin {
            RequestOrigin::User => None,
            RequestOrigin::Admin => Some(BroadcastKind::Admin),
            RequestOrigin::Channel => Some(BroadcastKind::Channel),
        };
        let broadcast = match kind {
            Some(kind) => {
                let delivered = self.dispatcher.deliver_broadcast(artifact, kind, global).await;
                self.emit(Event::Broadcast {
                    name: artifact.name.clone(),
                    delivered,
                });
                delivered
            }
            None => 0,
        };

        FileOutcome::Delivered { primary, broadcast }
    }

    async fn post_status(&self, chat: DestinationId, text: &str) -> Option<MessageHandle> {
        match self.transport.send_progress(chat, None, text).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(chat = %chat, error = %e, "Failed to post status message");
                None
            }
        }
    }

    async fn edit_status(&self, chat: DestinationId, handle: MessageHandle, text: &str) {
        if let Err(e) = self.transport.send_progress(chat, Some(handle), text).await {
            debug!(chat = %chat, error = %e, "Failed to update status message");
        }
    }

    /// Send a user-visible message; transport failures are only logged
    async fn notify(&self, chat: DestinationId, text: &str) {
        if let Err(e) = self.transport.report_error(chat, text).await {
            warn!(chat = %chat, error = %e, "Failed to send message");
        }
    }
}
