//! Out-of-band node record file ingestion.
//!
//! A local drop directory accepts individually signed node record files;
//! each `*.json` file observed (present at startup, or created or modified
//! later) is applied exactly like a push update. Failures are isolated per
//! file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::DirectoryCache;
use crate::client::apply_signed_record;
use crate::crypto::SignatureVerifier;
use crate::error::NodemapError;
use crate::types::SignedNodeRecord;

pub struct RecordFileWatcher {
    // Held for its side effect: dropping it stops the native watch.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl RecordFileWatcher {
    /// Ingest files already in `dir`, then watch it for new ones.
    pub async fn spawn(
        dir: impl AsRef<Path>,
        cache: Arc<DirectoryCache>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, NodemapError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
        let mut watcher =
            notify::recommended_watcher(move |event: Result<Event, notify::Error>| match event {
                Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                    for path in event.paths {
                        // The ingest task applies backpressure; a full
                        // queue drops the event and the file is picked up
                        // on its next modification.
                        let _ = tx.blocking_send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Record watch error: {}", e),
            })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let mut startup = std::fs::read_dir(&dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        startup.sort();

        let task = tokio::spawn(async move {
            for path in startup {
                ingest_record_file(&path, verifier.as_ref(), cache.as_ref()).await;
            }
            while let Some(path) = rx.recv().await {
                ingest_record_file(&path, verifier.as_ref(), cache.as_ref()).await;
            }
            debug!("Record file watch closed");
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for RecordFileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn ingest_record_file(path: &Path, verifier: &dyn SignatureVerifier, cache: &DirectoryCache) {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return;
    }
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), "Failed to read record file: {}", e);
            return;
        }
    };
    let signed: SignedNodeRecord = match serde_json::from_slice(&contents) {
        Ok(signed) => signed,
        Err(e) => {
            warn!(path = %path.display(), "Ignoring malformed record file: {}", e);
            return;
        }
    };
    match apply_signed_record(&signed, verifier, cache).await {
        Ok(true) => debug!(path = %path.display(), "Applied node record file"),
        // Bad signature: already logged by the application path.
        Ok(false) => {}
        Err(e) => warn!(path = %path.display(), "Failed to apply record file: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Signer, Ed25519Verifier};
    use crate::store::DirectoryStore;
    use crate::types::{NetworkAddress, NodeRecord, PartyAndCertificate, RecordOp};
    use std::time::Duration;

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

    async fn test_cache() -> Arc<DirectoryCache> {
        let store = Arc::new(DirectoryStore::open_in_memory().await.unwrap());
        Arc::new(DirectoryCache::load(store, 64).await.unwrap())
    }

    async fn wait_for_node(cache: &DirectoryCache, public_key: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if cache
                .get_node_by_legal_identity(public_key)
                .await
                .unwrap()
                .is_some()
            {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for record file to apply"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn write_signed(dir: &Path, name: &str, signed: &SignedNodeRecord) {
        let path = dir.join(name);
        std::fs::write(path, serde_json::to_vec(signed).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_preexisting_file_ingested_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache().await;

        let signer = test_signer(1);
        let signed = SignedNodeRecord::create(
            RecordOp::Add,
            test_record(&signer, "Alpha Corp", 10000, 1),
            &signer,
        )
        .unwrap();
        write_signed(dir.path(), "alpha.json", &signed);

        let _watcher = RecordFileWatcher::spawn(
            dir.path(),
            Arc::clone(&cache),
            Arc::new(Ed25519Verifier),
        )
        .await
        .unwrap();

        wait_for_node(&cache, &signer.public_key_hex()).await;
    }

    #[tokio::test]
    async fn test_dropped_file_ingested() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache().await;
        let _watcher = RecordFileWatcher::spawn(
            dir.path(),
            Arc::clone(&cache),
            Arc::new(Ed25519Verifier),
        )
        .await
        .unwrap();

        let signer = test_signer(2);
        let signed = SignedNodeRecord::create(
            RecordOp::Add,
            test_record(&signer, "Beta Ltd", 10001, 1),
            &signer,
        )
        .unwrap();
        write_signed(dir.path(), "beta.json", &signed);

        wait_for_node(&cache, &signer.public_key_hex()).await;
    }

    #[tokio::test]
    async fn test_bad_files_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache().await;

        // One garbage file, one tampered record, one good record; only the
        // good one lands.
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"not a record").unwrap();

        let forged = test_signer(3);
        let mut tampered = SignedNodeRecord::create(
            RecordOp::Add,
            test_record(&forged, "Forged Co", 10002, 1),
            &forged,
        )
        .unwrap();
        tampered.record.serial = 99;
        write_signed(dir.path(), "tampered.json", &tampered);

        let signer = test_signer(4);
        let signed = SignedNodeRecord::create(
            RecordOp::Add,
            test_record(&signer, "Gamma GmbH", 10003, 1),
            &signer,
        )
        .unwrap();
        write_signed(dir.path(), "zeta.json", &signed);

        let _watcher = RecordFileWatcher::spawn(
            dir.path(),
            Arc::clone(&cache),
            Arc::new(Ed25519Verifier),
        )
        .await
        .unwrap();

        wait_for_node(&cache, &signer.public_key_hex()).await;
        assert!(cache
            .get_node_by_legal_identity(&forged.public_key_hex())
            .await
            .unwrap()
            .is_none());
    }
}
