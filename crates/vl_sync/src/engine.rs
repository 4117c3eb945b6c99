//! Synchronizer engine — drives the conflict-free exchange protocol.
//!
//! Protocol: both sides open with `ContentHashes`.  A peer receiving a
//! hash different from its own answers with a `ContentDiff` carrying its
//! full mergeable content; a peer receiving an equal hash answers
//! `HashesMatch` and settles to `Idle`.  Merging a received diff re-opens
//! a round with fresh hashes, so both replicas converge and both sides
//! end `Idle` after finitely many rounds:
//!
//! ```text
//!   A: ContentHashes ─────▶ B          B: ContentHashes ─────▶ A
//!   A: ◀───── ContentDiff  B           B: ◀───── ContentDiff  A
//!   (merge, re-hash, equal, HashesMatch, Idle — on both sides)
//! ```
//!
//! The engine owns no socket: outbound packets go through the pluggable
//! [`SyncTransport`] capability, inbound ones are injected via
//! [`Synchronizer::handle_packet`].  Status is surfaced on a watch channel
//! for the completion detector.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use vl_store::MergeableStore;

use crate::codec::{MessageKind, SyncPacket};
use crate::error::SyncError;
use crate::transport::FramedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Active,
}

/// The send / finish / destroy capability the engine drives.
/// Chosen at construction time; tests plug in a capturing fake.
pub trait SyncTransport: Send + Sync {
    fn send(&self, packet: &SyncPacket);
    /// Signal "done sending" to the peer (half-close).
    fn finish(&self);
    /// Tear the transport down.
    fn destroy(&self);
}

impl SyncTransport for FramedSender {
    fn send(&self, packet: &SyncPacket) {
        FramedSender::send(self, packet);
    }

    fn finish(&self) {
        FramedSender::finish(self);
    }

    fn destroy(&self) {
        FramedSender::destroy(self);
    }
}

pub struct Synchronizer {
    store: Arc<Mutex<MergeableStore>>,
    transport: Arc<dyn SyncTransport>,
    status_tx: watch::Sender<SyncStatus>,
}

impl Synchronizer {
    pub fn new(store: Arc<Mutex<MergeableStore>>, transport: Arc<dyn SyncTransport>) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Active);
        Self { store, transport, status_tx }
    }

    /// Status signal; `Idle`/`Active` are the load-bearing states for
    /// termination detection.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Open the exchange.  Resolves once the opening hashes are issued —
    /// this is the start of the exchange, not its completion.
    pub async fn start_sync(&self) -> Result<(), SyncError> {
        self.set_status(SyncStatus::Active);
        self.send_content_hashes().await
    }

    /// Inject one received packet.
    pub async fn handle_packet(&self, packet: SyncPacket) -> Result<(), SyncError> {
        tracing::debug!(kind = ?packet.kind, peer = packet.peer_id(), "sync packet received");
        match packet.kind {
            MessageKind::ContentHashes => {
                let remote_hash = packet
                    .body
                    .get("hash")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_owned();
                let (local_hash, content) = {
                    let store = self.store.lock().await;
                    let hash = store.content_hash()?;
                    if hash == remote_hash {
                        (hash, None)
                    } else {
                        let content = serde_json::to_value(&*store)
                            .map_err(vl_store::StoreError::from)?;
                        (hash, Some(content))
                    }
                };
                match content {
                    None => {
                        self.transport.send(&SyncPacket::new(
                            MessageKind::HashesMatch,
                            packet.request_id,
                            serde_json::Value::Null,
                        ));
                        self.set_status(SyncStatus::Idle);
                    }
                    Some(content) => {
                        self.set_status(SyncStatus::Active);
                        tracing::debug!(local = %local_hash, remote = %remote_hash, "content differs, sending diff");
                        self.transport.send(&SyncPacket::new(
                            MessageKind::ContentDiff,
                            packet.request_id,
                            serde_json::json!({ "content": content }),
                        ));
                    }
                }
            }
            MessageKind::ContentDiff => {
                self.set_status(SyncStatus::Active);
                let content = packet
                    .body
                    .get("content")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let remote: MergeableStore =
                    serde_json::from_value(content).map_err(vl_store::StoreError::from)?;
                self.store.lock().await.merge(&remote);
                self.send_content_hashes().await?;
            }
            MessageKind::HashesMatch => {
                self.set_status(SyncStatus::Idle);
            }
        }
        Ok(())
    }

    pub fn destroy(&self) {
        self.transport.destroy();
    }

    async fn send_content_hashes(&self) -> Result<(), SyncError> {
        let hash = self.store.lock().await.content_hash()?;
        self.transport.send(&SyncPacket::new(
            MessageKind::ContentHashes,
            Some(uuid::Uuid::new_v4().to_string()),
            serde_json::json!({ "hash": hash }),
        ));
        Ok(())
    }

    fn set_status(&self, status: SyncStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use vl_store::CredentialRecord;

    #[derive(Default)]
    struct CapturingTransport {
        sent: StdMutex<Vec<SyncPacket>>,
    }

    impl SyncTransport for CapturingTransport {
        fn send(&self, packet: &SyncPacket) {
            self.sent.lock().unwrap().push(packet.clone());
        }
        fn finish(&self) {}
        fn destroy(&self) {}
    }

    fn store_with(id: &str, name: &str, time: i64) -> Arc<Mutex<MergeableStore>> {
        let mut store = MergeableStore::new();
        store.insert_record(id, CredentialRecord::new(name, time));
        Arc::new(Mutex::new(store))
    }

    fn engine(store: Arc<Mutex<MergeableStore>>) -> (Synchronizer, Arc<CapturingTransport>) {
        let transport = Arc::new(CapturingTransport::default());
        (Synchronizer::new(store, transport.clone()), transport)
    }

    #[tokio::test]
    async fn start_sends_content_hashes() {
        let (sync, transport) = engine(store_with("r1", "Site", 100));
        sync.start_sync().await.unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::ContentHashes);
        assert!(sent[0].body["hash"].is_string());
    }

    #[tokio::test]
    async fn equal_hashes_settle_idle() {
        let store = store_with("r1", "Site", 100);
        let hash = store.lock().await.content_hash().unwrap();
        let (sync, transport) = engine(store);
        let mut status = sync.status();

        sync.handle_packet(SyncPacket::new(
            MessageKind::ContentHashes,
            Some("req".into()),
            serde_json::json!({ "hash": hash }),
        ))
        .await
        .unwrap();

        assert_eq!(*status.borrow_and_update(), SyncStatus::Idle);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::HashesMatch);
        assert_eq!(sent[0].request_id.as_deref(), Some("req"));
    }

    #[tokio::test]
    async fn differing_hashes_answered_with_full_diff() {
        let (sync, transport) = engine(store_with("r1", "Site", 100));
        sync.handle_packet(SyncPacket::new(
            MessageKind::ContentHashes,
            None,
            serde_json::json!({ "hash": "something-else" }),
        ))
        .await
        .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::ContentDiff);
        let remote: MergeableStore =
            serde_json::from_value(sent[0].body["content"].clone()).unwrap();
        assert_eq!(remote.record("r1").unwrap().name.value, "Site");
    }

    #[tokio::test]
    async fn diff_is_merged_and_rehashed() {
        let store = store_with("r1", "Old", 100);
        let (sync, transport) = engine(store.clone());

        let remote = {
            let mut remote = MergeableStore::new();
            remote.insert_record("r1", CredentialRecord::new("New", 200));
            serde_json::to_value(&remote).unwrap()
        };
        sync.handle_packet(SyncPacket::new(
            MessageKind::ContentDiff,
            None,
            serde_json::json!({ "content": remote }),
        ))
        .await
        .unwrap();

        assert_eq!(store.lock().await.record("r1").unwrap().name.value, "New");
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().kind, MessageKind::ContentHashes);
    }

    #[tokio::test]
    async fn two_engines_converge_offline() {
        // Drive both engines by hand, ferrying packets between transports.
        let store_a = store_with("r1", "From A", 100);
        let store_b = store_with("r2", "From B", 100);
        let (sync_a, transport_a) = engine(store_a.clone());
        let (sync_b, transport_b) = engine(store_b.clone());

        sync_a.start_sync().await.unwrap();
        sync_b.start_sync().await.unwrap();

        for _ in 0..8 {
            let from_a: Vec<_> = transport_a.sent.lock().unwrap().drain(..).collect();
            let from_b: Vec<_> = transport_b.sent.lock().unwrap().drain(..).collect();
            if from_a.is_empty() && from_b.is_empty() {
                break;
            }
            for packet in from_a {
                sync_b.handle_packet(packet).await.unwrap();
            }
            for packet in from_b {
                sync_a.handle_packet(packet).await.unwrap();
            }
        }

        let hash_a = store_a.lock().await.content_hash().unwrap();
        let hash_b = store_b.lock().await.content_hash().unwrap();
        assert_eq!(hash_a, hash_b);
        assert_eq!(store_a.lock().await.record_count(), 2);
        assert_eq!(*sync_a.status().borrow(), SyncStatus::Idle);
        assert_eq!(*sync_b.status().borrow(), SyncStatus::Idle);
    }
}
