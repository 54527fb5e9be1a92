//! Network-wide signed parameters

use serde::{Deserialize, Serialize};

use crate::crypto::{content_hash, Ed25519Signer, SignatureVerifier};
use crate::error::NodemapError;

/// A notary identity agreed network-wide. Validating notaries inspect
/// transaction content; non-validating notaries only order it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotaryRecord {
    pub legal_name: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    pub validating: bool,
}

/// Network-wide configuration agreed out-of-band and pinned by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkParameters {
    pub minimum_platform_version: u32,
    pub epoch: u64,
    pub notaries: Vec<NotaryRecord>,
}

impl NetworkParameters {
    /// Identifying content hash over the canonical JSON document.
    pub fn hash(&self) -> Result<String, NodemapError> {
        Ok(content_hash(&serde_json::to_vec(self)?))
    }

    pub fn validating_notaries(&self) -> Vec<&NotaryRecord> {
        self.notaries.iter().filter(|n| n.validating).collect()
    }
}

/// Parameters plus the network operator's signature over them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedNetworkParameters {
    pub parameters: NetworkParameters,
    /// Hex-encoded Ed25519 signature.
    pub signature: String,
}

impl SignedNetworkParameters {
    pub fn create(
        parameters: NetworkParameters,
        signer: &Ed25519Signer,
    ) -> Result<Self, NodemapError> {
        let signature = signer.sign_hex(&serde_json::to_vec(&parameters)?);
        Ok(Self {
            parameters,
            signature,
        })
    }

    /// Yields the inner parameters, or fails when the signature does not
    /// check out against the trusted operator key.
    pub fn verify(
        &self,
        verifier: &dyn SignatureVerifier,
        trusted_key_hex: &str,
    ) -> Result<&NetworkParameters, NodemapError> {
        let bytes = serde_json::to_vec(&self.parameters)?;
        verifier.verify(trusted_key_hex, &bytes, &self.signature)?;
        Ok(&self.parameters)
    }
}
