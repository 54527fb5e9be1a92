//! nodemap: network directory cache for a permissioned ledger node.
//!
//! Every node keeps a locally cached, eventually consistent view of the
//! network: which parties exist, their addresses, certificates, and
//! platform versions, and which parties act as notaries. The view is built
//! by a request/response fetch from the directory service, an optional
//! subscription to unsolicited push updates, and durable persistence, and
//! is exposed to the rest of the node as a snapshot plus change feed.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod cache;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod feed;
pub mod identity;
pub mod params;
pub mod store;
pub mod transport;
pub mod types;
pub mod watch;

pub use cache::DirectoryCache;
pub use client::{ClientState, ReadySignal, SyncClient};
pub use config::DirectoryConfig;
pub use crypto::{content_hash, key_hash, Ed25519Signer, Ed25519Verifier, SignatureVerifier};
pub use error::NodemapError;
pub use feed::{ChangeFeed, DataFeed, MapChange};
pub use identity::{IdentityBinder, IdentityService};
pub use params::ParameterNegotiator;
pub use store::DirectoryStore;
pub use transport::{InProcessHub, InProcessTransport, InboundMessage, MessagingTransport};
pub use types::{
    Ack, FetchRequest, FetchResponse, NetworkAddress, NetworkParameters, NodeRecord, NotaryRecord,
    ParametersRequest, ParametersResponse, PartyAndCertificate, PartyLocation, RecordOp,
    SignedNetworkParameters, SignedNodeRecord, SubscribeRequest, SubscribeResponse, Update,
    ACK_TOPIC, FETCH_TOPIC, PARAMETERS_TOPIC, PUSH_TOPIC, SUBSCRIBE_TOPIC,
};
pub use watch::RecordFileWatcher;
