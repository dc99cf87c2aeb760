//! Recording fake of the messaging transport

use async_trait::async_trait;
use sharelink_dl::{DeliveryError, DestinationId, MessageHandle, Transport};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// An artifact as the transport received it
#[derive(Debug, Clone, PartialEq)]
pub struct SentArtifact {
    pub destination: DestinationId,
    pub name: String,
    pub bytes: Vec<u8>,
    pub reply_to: Option<MessageHandle>,
}

/// Records every call; artifact bytes are read at send time
#[derive(Default)]
pub struct RecordingTransport {
    pub artifacts: Mutex<Vec<SentArtifact>>,
    pub messages: Mutex<Vec<(DestinationId, String)>>,
    pub progress: Mutex<Vec<(DestinationId, Option<MessageHandle>, String)>>,
    pub deleted: Mutex<Vec<MessageHandle>>,
    next_handle: AtomicI64,
}

impl RecordingTransport {
    pub fn artifacts(&self) -> Vec<SentArtifact> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_artifact(
        &self,
        destination: DestinationId,
        path: &Path,
        display_name: &str,
        reply_to: Option<MessageHandle>,
    ) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DeliveryError::TransportRejected(e.to_string()))?;
        self.artifacts.lock().unwrap().push(SentArtifact {
            destination,
            name: display_name.to_string(),
            bytes,
            reply_to,
        });
        Ok(())
    }

    async fn send_progress(
        &self,
        destination: DestinationId,
        handle: Option<MessageHandle>,
        text: &str,
    ) -> Result<MessageHandle, DeliveryError> {
        self.progress
            .lock()
            .unwrap()
            .push((destination, handle, text.to_string()));
        Ok(handle.unwrap_or_else(|| MessageHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1)))
    }

    async fn delete_message(
        &self,
        _destination: DestinationId,
        handle: MessageHandle,
    ) -> Result<(), DeliveryError> {
        self.deleted.lock().unwrap().push(handle);
        Ok(())
    }

    async fn report_error(&self, destination: DestinationId, text: &str) -> Result<(), DeliveryError> {
        self.messages
            .lock()
            .unwrap()
            .push((destination, text.to_string()));
        Ok(())
    }
}
