//! In-memory directory cache with write-through persistence.
//!
//! The cache is the authoritative map from identity key hash to node
//! record. One mutex owns all mutation; each mutation writes through to the
//! store in one transaction and publishes its change only after the commit,
//! still under the lock. Point queries go straight to the store in their
//! own short transaction and never contend with mutations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::NodemapError;
use crate::feed::{ChangeFeed, DataFeed, MapChange};
use crate::store::DirectoryStore;
use crate::types::{NetworkAddress, NodeRecord, PartyLocation};

pub struct DirectoryCache {
    store: Arc<DirectoryStore>,
    feed: ChangeFeed,
    /// Mutation lock and authoritative map in one: holding the guard is
    /// holding the lock.
    records: Mutex<HashMap<String, NodeRecord>>,
    loaded_from_store: bool,
}

impl DirectoryCache {
    /// Prime the cache from durable rows.
    pub async fn load(
        store: Arc<DirectoryStore>,
        feed_capacity: usize,
    ) -> Result<Self, NodemapError> {
        let rows = store.load_all().await?;
        let loaded_from_store = !rows.is_empty();
        let mut records = HashMap::with_capacity(rows.len());
        for record in rows {
            records.insert(record.main_key_hash()?, record);
        }
        if loaded_from_store {
            info!("Loaded {} directory records from store", records.len());
        }
        Ok(Self {
            store,
            feed: ChangeFeed::new(feed_capacity),
            records: Mutex::new(records),
            loaded_from_store,
        })
    }

    /// Whether construction found durable records from an earlier run.
    pub fn loaded_from_store(&self) -> bool {
        self.loaded_from_store
    }

    // ==================== Mutation ====================

    /// Apply an ADD. An existing entry with an equal or higher serial wins
    /// and the incoming record is discarded without error or event.
    pub async fn add_node(&self, record: NodeRecord) -> Result<(), NodemapError> {
        let key_hash = record.main_key_hash()?;
        let mut records = self.records.lock().await;

        let previous = records.get(&key_hash).cloned();
        if let Some(ref existing) = previous {
            if existing.serial >= record.serial {
                debug!(
                    key = %key_hash,
                    current = existing.serial,
                    incoming = record.serial,
                    "Discarding stale node record"
                );
                return Ok(());
            }
        }

        let mut tx = self.store.begin().await?;
        self.store.upsert_record(&mut tx, &record).await?;

        let mut pending = self.feed.begin();
        match previous {
            None => pending.stage(MapChange::Added(record.clone())),
            Some(prev) if prev != record => pending.stage(MapChange::Modified {
                node: record.clone(),
                previous: prev,
            }),
            Some(_) => {}
        }

        tx.commit().await?;
        records.insert(key_hash, record);
        pending.commit();
        Ok(())
    }

    /// Apply a REMOVE. No serial check; removal always wins.
    pub async fn remove_node(&self, record: &NodeRecord) -> Result<(), NodemapError> {
        let key_hash = record.main_key_hash()?;
        let mut records = self.records.lock().await;

        let mut tx = self.store.begin().await?;
        self.store.remove_record(&mut tx, &key_hash).await?;

        let removed = records.get(&key_hash).cloned().unwrap_or_else(|| record.clone());
        let mut pending = self.feed.begin();
        pending.stage(MapChange::Removed(removed));

        tx.commit().await?;
        records.remove(&key_hash);
        pending.commit();
        Ok(())
    }

    /// Administrative removal of every record, without serial checks and
    /// without per-record events. Serialized against `add_node` and
    /// `remove_node` by the same lock.
    pub async fn clear(&self) -> Result<(), NodemapError> {
        let mut records = self.records.lock().await;

        let mut tx = self.store.begin().await?;
        self.store.clear_records(&mut tx).await?;
        tx.commit().await?;

        let count = records.len();
        records.clear();
        info!("Cleared {} directory records", count);
        Ok(())
    }

    // ==================== Snapshot & feed ====================

    /// Current snapshot plus a subscription to subsequent changes, captured
    /// under the mutation lock: every change is in exactly one of the two.
    pub async fn track(&self) -> DataFeed {
        let records = self.records.lock().await;
        let snapshot = records.values().cloned().collect();
        let updates = self.feed.subscribe();
        DataFeed { snapshot, updates }
    }

    /// Subscription to changes only, with no snapshot.
    pub fn changes(&self) -> broadcast::Receiver<MapChange> {
        self.feed.subscribe()
    }

    // ==================== Point queries ====================

    /// The node whose identity set contains the given key, if any. When a
    /// distributed identity matches several nodes, the lowest-id record is
    /// returned; use [`DirectoryCache::get_party_info`] to distinguish.
    pub async fn get_node_by_legal_identity(
        &self,
        public_key: &str,
    ) -> Result<Option<NodeRecord>, NodemapError> {
        let mut owners = self.store.get_by_identity_key(public_key).await?;
        if owners.is_empty() {
            return Ok(None);
        }
        Ok(Some(owners.swap_remove(0)))
    }

    pub async fn get_nodes_by_legal_name(
        &self,
        name: &str,
    ) -> Result<Vec<NodeRecord>, NodemapError> {
        self.store.get_by_legal_name(name).await
    }

    /// Addresses are expected unique; more than one match is surfaced as a
    /// fatal consistency violation.
    pub async fn get_node_by_address(
        &self,
        address: &NetworkAddress,
    ) -> Result<Option<NodeRecord>, NodemapError> {
        self.store.get_by_address(&address.host, address.port).await
    }

    /// Resolve a legal identity to its physical location: one owning record
    /// is a single node, several owning records are a cluster acting under
    /// one identity.
    pub async fn get_party_info(
        &self,
        public_key: &str,
    ) -> Result<Option<PartyLocation>, NodemapError> {
        let owners = self.store.get_by_identity_key(public_key).await?;
        Ok(match owners.len() {
            0 => None,
            1 => Some(PartyLocation::SingleNode {
                addresses: owners[0].addresses.clone(),
            }),
            _ => Some(PartyLocation::DistributedNode),
        })
    }
}
