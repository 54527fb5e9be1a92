//! Identity-binding directory decorator.
//!
//! Wraps a [`DirectoryCache`] by composition: every operation forwards to
//! the wrapped cache, and each identity on a newly added node is registered
//! with the external identity-verification service. Registration failures
//! are logged and never block directory processing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::DirectoryCache;
use crate::error::NodemapError;
use crate::feed::{DataFeed, MapChange};
use crate::types::{NetworkAddress, NodeRecord, PartyAndCertificate, PartyLocation};

/// External identity-verification service.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn verify_and_register(
        &self,
        identity: &PartyAndCertificate,
    ) -> Result<(), NodemapError>;
}

pub struct IdentityBinder {
    cache: Arc<DirectoryCache>,
    task: JoinHandle<()>,
}

impl IdentityBinder {
    pub fn new(cache: Arc<DirectoryCache>, identities: Arc<dyn IdentityService>) -> Self {
        let mut changes = cache.changes();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(MapChange::Added(node)) => {
                        for identity in &node.identities {
                            if let Err(e) = identities.verify_and_register(identity).await {
                                warn!(
                                    legal_name = %identity.legal_name,
                                    "Identity registration failed: {}", e
                                );
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Identity binder lagged, skipped {} changes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Identity binder feed closed");
        });
        Self { cache, task }
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        &self.cache
    }

    // ==================== Forwarded operations ====================

    pub async fn add_node(&self, record: NodeRecord) -> Result<(), NodemapError> {
        self.cache.add_node(record).await
    }

    pub async fn remove_node(&self, record: &NodeRecord) -> Result<(), NodemapError> {
        self.cache.remove_node(record).await
    }

    pub async fn clear(&self) -> Result<(), NodemapError> {
        self.cache.clear().await
    }

    pub async fn track(&self) -> DataFeed {
        self.cache.track().await
    }

    pub async fn get_node_by_legal_identity(
        &self,
        public_key: &str,
    ) -> Result<Option<NodeRecord>, NodemapError> {
        self.cache.get_node_by_legal_identity(public_key).await
    }

    pub async fn get_nodes_by_legal_name(
        &self,
        name: &str,
    ) -> Result<Vec<NodeRecord>, NodemapError> {
        self.cache.get_nodes_by_legal_name(name).await
    }

    pub async fn get_node_by_address(
        &self,
        address: &NetworkAddress,
    ) -> Result<Option<NodeRecord>, NodemapError> {
        self.cache.get_node_by_address(address).await
    }

    pub async fn get_party_info(
        &self,
        public_key: &str,
    ) -> Result<Option<PartyLocation>, NodemapError> {
        self.cache.get_party_info(public_key).await
    }
}

impl Drop for IdentityBinder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Signer;
    use crate::store::DirectoryStore;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingIdentityService {
        registered: Mutex<Vec<String>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl IdentityService for RecordingIdentityService {
        async fn verify_and_register(
            &self,
            identity: &PartyAndCertificate,
        ) -> Result<(), NodemapError> {
            if self.fail_for.as_deref() == Some(identity.legal_name.as_str()) {
                return Err(NodemapError::InvalidSignature("untrusted cert".to_string()));
            }
            self.registered.lock().push(identity.legal_name.clone());
            Ok(())
        }
    }

    fn test_signer(byte: u8) -> Ed25519Signer {
        Ed25519Signer::from_seed([byte; 32])
    }

    fn test_record(signer: &Ed25519Signer, name: &str, port: u16, serial: u64) -> NodeRecord {
        NodeRecord {
            addresses: vec![NetworkAddress::new("10.0.0.1", port)],
            identities: vec![PartyAndCertificate {
                legal_name: name.to_string(),
                public_key: signer.public_key_hex(),
                certificate: format!("cert:{}", name),
            }],
            platform_version: 4,
            serial,
        }
    }

    async fn wait_for_registration(service: &RecordingIdentityService, name: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if service.registered.lock().iter().any(|n| n == name) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for registration of {}",
                name
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn test_binder(
        service: Arc<RecordingIdentityService>,
    ) -> IdentityBinder {
        let store = Arc::new(DirectoryStore::open_in_memory().await.unwrap());
        let cache = Arc::new(DirectoryCache::load(store, 64).await.unwrap());
        IdentityBinder::new(cache, service)
    }

    #[tokio::test]
    async fn test_added_node_registers_identities() {
        let service = Arc::new(RecordingIdentityService::default());
        let binder = test_binder(Arc::clone(&service)).await;

        let signer = test_signer(1);
        let mut record = test_record(&signer, "Alpha Corp", 10000, 1);
        record.identities.push(PartyAndCertificate {
            legal_name: "Alpha Notary".to_string(),
            public_key: test_signer(2).public_key_hex(),
            certificate: "cert:notary".to_string(),
        });
        binder.add_node(record).await.unwrap();

        wait_for_registration(&service, "Alpha Corp").await;
        wait_for_registration(&service, "Alpha Notary").await;
    }

    #[tokio::test]
    async fn test_modified_node_does_not_reregister() {
        let service = Arc::new(RecordingIdentityService::default());
        let binder = test_binder(Arc::clone(&service)).await;

        let signer = test_signer(3);
        binder
            .add_node(test_record(&signer, "Beta Ltd", 10000, 1))
            .await
            .unwrap();
        wait_for_registration(&service, "Beta Ltd").await;

        binder
            .add_node(test_record(&signer, "Beta Ltd", 20000, 2))
            .await
            .unwrap();
        // The serial-2 update is a Modified change; give the binder task a
        // moment, then confirm no second registration happened.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let registered = service.registered.lock().clone();
        assert_eq!(registered, vec!["Beta Ltd".to_string()]);
    }

    #[tokio::test]
    async fn test_registration_failure_does_not_block_directory() {
        let service = Arc::new(RecordingIdentityService {
            registered: Mutex::new(Vec::new()),
            fail_for: Some("Rejected Co".to_string()),
        });
        let binder = test_binder(Arc::clone(&service)).await;

        let rejected = test_signer(4);
        binder
            .add_node(test_record(&rejected, "Rejected Co", 10000, 1))
            .await
            .unwrap();
        let accepted = test_signer(5);
        binder
            .add_node(test_record(&accepted, "Accepted Co", 10001, 1))
            .await
            .unwrap();

        wait_for_registration(&service, "Accepted Co").await;
        // The rejected identity never registered, but both nodes are in the
        // directory.
        assert!(!service
            .registered
            .lock()
            .iter()
            .any(|n| n == "Rejected Co"));
        assert_eq!(binder.track().await.snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_forwarding() {
        let service = Arc::new(RecordingIdentityService::default());
        let binder = test_binder(Arc::clone(&service)).await;

        let signer = test_signer(6);
        let record = test_record(&signer, "Gamma GmbH", 10000, 1);
        binder.add_node(record.clone()).await.unwrap();

        assert_eq!(
            binder
                .get_node_by_legal_identity(&signer.public_key_hex())
                .await
                .unwrap(),
            Some(record.clone())
        );
        assert_eq!(
            binder.get_nodes_by_legal_name("Gamma GmbH").await.unwrap(),
            vec![record.clone()]
        );
        assert_eq!(
            binder
                .get_node_by_address(&NetworkAddress::new("10.0.0.1", 10000))
                .await
                .unwrap(),
            Some(record.clone())
        );
        assert_eq!(
            binder
                .get_party_info(&signer.public_key_hex())
                .await
                .unwrap(),
            Some(PartyLocation::SingleNode {
                addresses: record.addresses.clone(),
            })
        );

        binder.remove_node(&record).await.unwrap();
        assert!(binder
            .get_node_by_legal_identity(&signer.public_key_hex())
            .await
            .unwrap()
            .is_none());

        binder.clear().await.unwrap();
        assert!(binder.track().await.snapshot.is_empty());
    }
}
