//! Directory data model and wire messages.

pub mod node;
pub mod params;
pub mod sync;

pub use node::{
    NetworkAddress, NodeRecord, PartyAndCertificate, PartyLocation, RecordOp, SignedNodeRecord,
};
pub use params::{NetworkParameters, NotaryRecord, SignedNetworkParameters};
pub use sync::{
    Ack, FetchRequest, FetchResponse, ParametersRequest, ParametersResponse, SubscribeRequest,
    SubscribeResponse, Update, ACK_TOPIC, FETCH_TOPIC, PARAMETERS_TOPIC, PUSH_TOPIC,
    SUBSCRIBE_TOPIC,
};
