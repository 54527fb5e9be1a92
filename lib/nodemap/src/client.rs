//! Directory sync protocol client.
//!
//! Drives the fetch/subscribe/push-ack exchange with the remote directory
//! service and feeds verified records into the cache. Push handling runs on
//! its own dispatch task; a bad message is logged and dropped without
//! acknowledgment and never stops the handler.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::DirectoryCache;
use crate::crypto::SignatureVerifier;
use crate::error::NodemapError;
use crate::params::ParameterNegotiator;
use crate::transport::MessagingTransport;
use crate::types::{
    Ack, FetchRequest, FetchResponse, RecordOp, SignedNodeRecord, SubscribeRequest,
    SubscribeResponse, Update, ACK_TOPIC, FETCH_TOPIC, PUSH_TOPIC, SUBSCRIBE_TOPIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unregistered,
    FetchIssued,
    Subscribed,
    OneShot,
    Ready,
}

/// Resolves exactly once, when the directory is safe to consume: either the
/// store already held valid parameters at startup, or the first connect
/// round trip completed.
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    fn mark(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Verify a signed record and apply it to the cache. Returns whether the
/// record was accepted for application; a failed signature is logged and
/// swallowed here because it must never abort the calling loop.
pub(crate) async fn apply_signed_record(
    signed: &SignedNodeRecord,
    verifier: &dyn SignatureVerifier,
    cache: &DirectoryCache,
) -> Result<bool, NodemapError> {
    let record = match signed.verify(verifier) {
        Ok(record) => record.clone(),
        Err(e) => {
            warn!("Dropping node record with invalid signature: {}", e);
            return Ok(false);
        }
    };
    match signed.op {
        RecordOp::Add => cache.add_node(record).await?,
        RecordOp::Remove => cache.remove_node(&record).await?,
    }
    Ok(true)
}

pub struct SyncClient {
    transport: Arc<dyn MessagingTransport>,
    cache: Arc<DirectoryCache>,
    negotiator: Arc<ParameterNegotiator>,
    verifier: Arc<dyn SignatureVerifier>,
    state: Mutex<ClientState>,
    ready: ReadySignal,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        cache: Arc<DirectoryCache>,
        negotiator: Arc<ParameterNegotiator>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            transport,
            cache,
            negotiator,
            verifier,
            state: Mutex::new(ClientState::Unregistered),
            ready: ReadySignal::new(),
            push_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    /// If the store already holds valid pinned parameters from an earlier
    /// run, the directory is immediately safe to consume. Returns whether
    /// that was the case.
    pub async fn resume_from_store(&self) -> Result<bool, NodemapError> {
        let restored = self.negotiator.restore().await?;
        if restored {
            self.ready.mark();
        }
        Ok(restored)
    }

    /// Fetch the directory from `remote`, negotiate parameters, apply the
    /// returned records, and optionally subscribe to pushes. Returns the
    /// directory version for use as the next `since_version` filter.
    pub async fn connect(
        &self,
        remote: &str,
        subscribe: bool,
        since_version: Option<u64>,
    ) -> Result<u64, NodemapError> {
        *self.state.lock() = ClientState::FetchIssued;

        let request = FetchRequest {
            subscribe,
            since_version,
            reply_to: self.transport.local_address(),
        };
        let reply = self
            .transport
            .request(FETCH_TOPIC, serde_json::to_vec(&request)?, remote)
            .await?;
        let response: FetchResponse = serde_json::from_slice(&reply)?;

        self.negotiator
            .observe(&response.parameters_hash, self.transport.as_ref(), remote)
            .await?;

        match &response.records {
            Some(records) => {
                info!(count = records.len(), "Applying fetched node records");
                for signed in records {
                    apply_signed_record(signed, self.verifier.as_ref(), self.cache.as_ref())
                        .await?;
                }
            }
            None => debug!(?since_version, "Directory unchanged since last fetch"),
        }

        if subscribe {
            self.install_push_handler();
            *self.state.lock() = ClientState::Subscribed;
        } else {
            *self.state.lock() = ClientState::OneShot;
        }

        self.ready.mark();
        *self.state.lock() = ClientState::Ready;
        Ok(response.version)
    }

    /// Install the push-update handler unless one is already running. Each
    /// inbound record is verified and applied; an acknowledgment carrying
    /// the update's version and our address goes back to the sender only on
    /// success. Failures are isolated per message.
    fn install_push_handler(&self) {
        let mut task = self.push_task.lock();
        if task.is_some() {
            debug!("Push handler already installed");
            return;
        }

        let mut inbound = self.transport.subscribe(PUSH_TOPIC);
        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let verifier = Arc::clone(&self.verifier);

        *task = Some(tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let update: Update = match serde_json::from_slice(&message.payload) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Dropping malformed push update: {}", e);
                        continue;
                    }
                };
                match apply_signed_record(&update.record, verifier.as_ref(), cache.as_ref()).await
                {
                    Ok(true) => {
                        let ack = Ack {
                            version: update.version,
                            reply_to: transport.local_address(),
                        };
                        let payload = match serde_json::to_vec(&ack) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("Failed to encode ack {}: {}", update.version, e);
                                continue;
                            }
                        };
                        if let Err(e) = transport.send(ACK_TOPIC, payload, &message.sender).await {
                            warn!("Failed to acknowledge update {}: {}", update.version, e);
                        }
                    }
                    // Verification failed; already logged, no ack.
                    Ok(false) => {}
                    Err(e) => warn!("Failed to apply push update {}: {}", update.version, e),
                }
            }
            debug!("Push subscription closed");
        }));
    }

    /// Deregister `party` from the directory service. An unknown party is
    /// rejected before any network call; remote refusal is a typed failure.
    pub async fn disconnect(&self, remote: &str, party: &str) -> Result<(), NodemapError> {
        if self.cache.get_node_by_legal_identity(party).await?.is_none() {
            return Err(NodemapError::UnknownParty(party.to_string()));
        }

        let request = SubscribeRequest {
            subscribe: false,
            party: party.to_string(),
            reply_to: self.transport.local_address(),
        };
        let reply = self
            .transport
            .request(SUBSCRIBE_TOPIC, serde_json::to_vec(&request)?, remote)
            .await?;
        let response: SubscribeResponse = serde_json::from_slice(&reply)?;
        if !response.confirmed {
            return Err(NodemapError::DeregistrationRefused(party.to_string()));
        }

        if let Some(task) = self.push_task.lock().take() {
            task.abort();
        }
        info!(%party, "Deregistered from directory service");
        Ok(())
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(task) = self.push_task.lock().take() {
            task.abort();
        }
    }
}
