//! Change feed with commit-gated publishing.
//!
//! Mutations stage their events on a [`PendingPublish`] while the store
//! transaction is open. Events reach subscribers only through
//! [`PendingPublish::commit`], called strictly after the transaction
//! commits; a rolled-back write drops its staged events with the value.

use tokio::sync::broadcast;

use crate::types::NodeRecord;

/// A single directory change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapChange {
    Added(NodeRecord),
    Modified {
        node: NodeRecord,
        previous: NodeRecord,
    },
    Removed(NodeRecord),
}

impl MapChange {
    /// The record the change is about (the new state for `Modified`).
    pub fn node(&self) -> &NodeRecord {
        match self {
            MapChange::Added(node) => node,
            MapChange::Modified { node, .. } => node,
            MapChange::Removed(node) => node,
        }
    }
}

/// A full snapshot paired with a live subscription to subsequent changes,
/// captured atomically by `DirectoryCache::track`.
pub struct DataFeed {
    pub snapshot: Vec<NodeRecord>,
    pub updates: broadcast::Receiver<MapChange>,
}

/// Broadcast fan-out for directory changes.
pub struct ChangeFeed {
    sender: broadcast::Sender<MapChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapChange> {
        self.sender.subscribe()
    }

    /// Start staging events for one store transaction.
    pub fn begin(&self) -> PendingPublish<'_> {
        PendingPublish {
            feed: self,
            events: Vec::new(),
        }
    }
}

/// Events buffered until the enclosing store transaction commits. Dropping
/// without `commit` publishes nothing.
pub struct PendingPublish<'a> {
    feed: &'a ChangeFeed,
    events: Vec<MapChange>,
}

impl PendingPublish<'_> {
    pub fn stage(&mut self, change: MapChange) {
        self.events.push(change);
    }

    pub fn commit(self) {
        for event in self.events {
            // No subscribers is not an error.
            let _ = self.feed.sender.send(event);
        }
    }
}
