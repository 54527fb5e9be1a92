//! Directory sync protocol messages

use serde::{Deserialize, Serialize};

use crate::types::node::SignedNodeRecord;
use crate::types::params::SignedNetworkParameters;

pub const FETCH_TOPIC: &str = "directory.fetch";
pub const PUSH_TOPIC: &str = "directory.push";
pub const ACK_TOPIC: &str = "directory.ack";
pub const PARAMETERS_TOPIC: &str = "directory.parameters";
pub const SUBSCRIBE_TOPIC: &str = "directory.subscribe";

/// Request for the full directory, optionally subscribing to pushes and
/// optionally filtered to "only if changed since `since_version`".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub subscribe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_version: Option<u64>,
    pub reply_to: String,
}

/// Fetch response. `records` is omitted when the directory is unchanged
/// since the requested version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub parameters_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<SignedNodeRecord>>,
    /// Directory version to carry into the next `sinceVersion` filter.
    pub version: u64,
}

/// Unsolicited push of a single directory update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub version: u64,
    pub record: SignedNodeRecord,
}

/// Acknowledgment of a push update, sent only after successful
/// verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub version: u64,
    pub reply_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersRequest {
    pub reply_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersResponse {
    pub signed_parameters: SignedNetworkParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub subscribe: bool,
    /// Hex public key of the party being (de)registered.
    pub party: String,
    pub reply_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub confirmed: bool,
}
