use super::*;
use crate::error::Error;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Default)]
struct FakeTransport {
    rejects: HashSet<DestinationId>,
    sent: Mutex<Vec<(DestinationId, String, Option<MessageHandle>)>>,
    errors: Mutex<Vec<(DestinationId, String)>>,
}

impl FakeTransport {
    fn rejecting(destinations: &[i64]) -> Self {
        Self {
            rejects: destinations.iter().map(|&d| DestinationId(d)).collect(),
            ..Default::default()
        }
    }

    fn sent_to(&self) -> Vec<DestinationId> {
        self.sent.lock().unwrap().iter().map(|(d, _, _)| *d).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_artifact(
        &self,
        destination: DestinationId,
        _path: &Path,
        display_name: &str,
        reply_to: Option<MessageHandle>,
    ) -> std::result::Result<(), DeliveryError> {
        if self.rejects.contains(&destination) {
            return Err(DeliveryError::DestinationUnreachable {
                destination,
                reason: "chat not found".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination, display_name.to_string(), reply_to));
        Ok(())
    }

    async fn send_progress(
        &self,
        _destination: DestinationId,
        handle: Option<MessageHandle>,
        _text: &str,
    ) -> std::result::Result<MessageHandle, DeliveryError> {
        Ok(handle.unwrap_or(MessageHandle(1)))
    }

    async fn delete_message(
        &self,
        _destination: DestinationId,
        _handle: MessageHandle,
    ) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }

    async fn report_error(
        &self,
        destination: DestinationId,
        text: &str,
    ) -> std::result::Result<(), DeliveryError> {
        self.errors
            .lock()
            .unwrap()
            .push((destination, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryLedger {
    entries: Mutex<Vec<(String, DestinationId)>>,
    broken: bool,
}

#[async_trait]
impl DeliveryLedger for MemoryLedger {
    async fn ledger_has(&self, name: &str) -> Result<bool> {
        if self.broken {
            return Err(Error::Other("ledger offline".into()));
        }
        Ok(self.entries.lock().unwrap().iter().any(|(n, _)| n == name))
    }

    async fn ledger_insert(
        &self,
        name: &str,
        destination: DestinationId,
        _timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push((name.to_string(), destination));
        Ok(())
    }
}

fn artifact(name: &str) -> Artifact {
    Artifact {
        name: name.to_string(),
        path: PathBuf::from(format!("/scratch/{name}")),
        size_bytes: 10,
    }
}

fn broadcast_config(destinations: &[i64]) -> GlobalConfig {
    GlobalConfig {
        admin_broadcast_enabled: true,
        channel_broadcast_enabled: true,
        destination_set: destinations.iter().map(|&d| DestinationId(d)).collect(),
        ..Default::default()
    }
}

fn dispatcher(
    transport: FakeTransport,
    ledger: MemoryLedger,
) -> (DeliveryDispatcher, Arc<FakeTransport>, Arc<MemoryLedger>) {
    let transport = Arc::new(transport);
    let ledger = Arc::new(ledger);
    (
        DeliveryDispatcher::new(transport.clone(), ledger.clone()),
        transport,
        ledger,
    )
}

#[tokio::test]
async fn primary_delivery_replies_to_request() {
    let (dispatcher, transport, ledger) =
        dispatcher(FakeTransport::default(), MemoryLedger::default());

    let ok = dispatcher
        .deliver_primary(&artifact("clip.mp4"), DestinationId(7), Some(MessageHandle(99)))
        .await;

    assert!(ok);
    assert_eq!(
        *transport.sent.lock().unwrap(),
        vec![(DestinationId(7), "clip.mp4".to_string(), Some(MessageHandle(99)))]
    );
    assert!(ledger.entries.lock().unwrap().is_empty(), "primary delivery is not recorded");
}

#[tokio::test]
async fn primary_failure_is_reported_to_recipient() {
    let (dispatcher, transport, _ledger) =
        dispatcher(FakeTransport::rejecting(&[7]), MemoryLedger::default());

    let ok = dispatcher
        .deliver_primary(&artifact("clip.mp4"), DestinationId(7), None)
        .await;

    assert!(!ok);
    let errors = transport.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, DestinationId(7));
    assert!(errors[0].1.contains("clip.mp4"));
}

#[tokio::test]
async fn second_broadcast_of_same_name_sends_nothing() {
    let (dispatcher, transport, ledger) =
        dispatcher(FakeTransport::default(), MemoryLedger::default());

    let first = dispatcher
        .deliver_broadcast(&artifact("clip.mp4"), BroadcastKind::Admin, &broadcast_config(&[1, 2]))
        .await;
    // A different destination set does not matter; dedup is by name
    let second = dispatcher
        .deliver_broadcast(&artifact("clip.mp4"), BroadcastKind::Channel, &broadcast_config(&[3]))
        .await;

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(transport.sent_to(), vec![DestinationId(1), DestinationId(2)]);
    assert_eq!(ledger.entries.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn failing_destination_does_not_stop_the_rest() {
    let (dispatcher, transport, ledger) =
        dispatcher(FakeTransport::rejecting(&[2]), MemoryLedger::default());

    let delivered = dispatcher
        .deliver_broadcast(&artifact("a.mkv"), BroadcastKind::Admin, &broadcast_config(&[1, 2, 3]))
        .await;

    assert_eq!(delivered, 2);
    assert_eq!(transport.sent_to(), vec![DestinationId(1), DestinationId(3)]);
    let recorded: Vec<DestinationId> = ledger
        .entries
        .lock()
        .unwrap()
        .iter()
        .map(|(_, d)| *d)
        .collect();
    assert_eq!(recorded, vec![DestinationId(1), DestinationId(3)]);
}

#[tokio::test]
async fn disabled_flag_skips_broadcast() {
    let (dispatcher, transport, _ledger) =
        dispatcher(FakeTransport::default(), MemoryLedger::default());
    let mut config = broadcast_config(&[1]);
    config.admin_broadcast_enabled = false;

    assert_eq!(
        dispatcher
            .deliver_broadcast(&artifact("a.mp4"), BroadcastKind::Admin, &config)
            .await,
        0
    );
    assert!(transport.sent_to().is_empty());

    // The channel flag is independent
    assert_eq!(
        dispatcher
            .deliver_broadcast(&artifact("a.mp4"), BroadcastKind::Channel, &config)
            .await,
        1
    );
}

#[tokio::test]
async fn empty_destination_set_sends_nothing() {
    let (dispatcher, transport, ledger) =
        dispatcher(FakeTransport::default(), MemoryLedger::default());

    let delivered = dispatcher
        .deliver_broadcast(&artifact("a.mp4"), BroadcastKind::Admin, &broadcast_config(&[]))
        .await;

    assert_eq!(delivered, 0);
    assert!(transport.sent_to().is_empty());
    assert!(ledger.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_ledger_aborts_broadcast() {
    let ledger = MemoryLedger {
        broken: true,
        ..Default::default()
    };
    let (dispatcher, transport, _ledger) = dispatcher(FakeTransport::default(), ledger);

    let delivered = dispatcher
        .deliver_broadcast(&artifact("a.mp4"), BroadcastKind::Admin, &broadcast_config(&[1]))
        .await;

    assert_eq!(delivered, 0);
    assert!(transport.sent_to().is_empty());
}

#[test]
fn excerpt_limits_length() {
    let long = "x".repeat(500);
    assert_eq!(excerpt(&long).len(), ERROR_EXCERPT_CHARS);
    assert_eq!(excerpt("short"), "short");
}
