//! Node records & party identity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::{key_hash, Ed25519Signer, SignatureVerifier};
use crate::error::NodemapError;

/// A reachable endpoint for a node, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NetworkAddress {
    type Err = NodemapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| NodemapError::InvalidAddress(format!("missing port in '{}'", s)))?;
        if host.is_empty() {
            return Err(NodemapError::InvalidAddress(format!(
                "missing host in '{}'",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| NodemapError::InvalidAddress(format!("bad port in '{}': {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

/// A legal identity and the certificate binding its key to its legal name.
/// Certificate issuance is external; the blob is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyAndCertificate {
    pub legal_name: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    pub certificate: String,
}

impl PartyAndCertificate {
    pub fn key_hash(&self) -> String {
        key_hash(&self.public_key)
    }
}

/// Directory entry for one peer: addresses, identities, platform version,
/// and the per-identity monotonic serial that orders updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub addresses: Vec<NetworkAddress>,
    /// Ordered; the first entry is the node's main identity.
    pub identities: Vec<PartyAndCertificate>,
    pub platform_version: u32,
    pub serial: u64,
}

impl NodeRecord {
    pub fn main_identity(&self) -> Option<&PartyAndCertificate> {
        self.identities.first()
    }

    /// Cache and storage key: hash of the main identity's public key.
    pub fn main_key_hash(&self) -> Result<String, NodemapError> {
        self.main_identity()
            .map(|identity| identity.key_hash())
            .ok_or_else(|| NodemapError::MalformedRecord("record has no identities".to_string()))
    }
}

/// Directory operation carried by a signed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOp {
    Add,
    Remove,
}

/// A node record plus an operation tag, signed by the record's main
/// identity key over the canonical JSON of the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedNodeRecord {
    pub op: RecordOp,
    pub record: NodeRecord,
    /// Hex-encoded Ed25519 signature.
    pub signature: String,
}

impl SignedNodeRecord {
    pub fn create(
        op: RecordOp,
        record: NodeRecord,
        signer: &Ed25519Signer,
    ) -> Result<Self, NodemapError> {
        let signature = signer.sign_hex(&Self::signing_bytes(op, &record)?);
        Ok(Self {
            op,
            record,
            signature,
        })
    }

    fn signing_bytes(op: RecordOp, record: &NodeRecord) -> Result<Vec<u8>, NodemapError> {
        Ok(serde_json::to_vec(&(op, record))?)
    }

    /// Yields the inner record, or fails when the signature does not check
    /// out against the record's main identity key.
    pub fn verify(&self, verifier: &dyn SignatureVerifier) -> Result<&NodeRecord, NodemapError> {
        let main = self
            .record
            .main_identity()
            .ok_or_else(|| NodemapError::MalformedRecord("record has no identities".to_string()))?;
        let bytes = Self::signing_bytes(self.op, &self.record)?;
        verifier.verify(&main.public_key, &bytes, &self.signature)?;
        Ok(&self.record)
    }
}

/// Resolution of a legal identity to its physical location: either exactly
/// one node, or a cluster of nodes acting under one identity (e.g. a notary
/// cluster).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PartyLocation {
    SingleNode { addresses: Vec<NetworkAddress> },
    DistributedNode,
}
