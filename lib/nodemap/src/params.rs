//! Network parameter negotiation and pinning.
//!
//! Parameters are fetched once, verified against the trusted operator key,
//! checked for platform compatibility, persisted, and pinned by content
//! hash. After pinning, any differently-hashed observation is a fatal
//! inconsistency; parameters are never silently replaced.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::crypto::SignatureVerifier;
use crate::error::NodemapError;
use crate::store::DirectoryStore;
use crate::transport::MessagingTransport;
use crate::types::{
    NetworkParameters, NotaryRecord, ParametersRequest, ParametersResponse, PARAMETERS_TOPIC,
};

#[derive(Clone)]
struct Pinned {
    hash: String,
    parameters: NetworkParameters,
}

pub struct ParameterNegotiator {
    store: Arc<DirectoryStore>,
    verifier: Arc<dyn SignatureVerifier>,
    /// Hex key trusted to sign network parameters.
    trusted_key: String,
    local_minimum_platform_version: u32,
    pinned: RwLock<Option<Pinned>>,
}

impl ParameterNegotiator {
    pub fn new(
        store: Arc<DirectoryStore>,
        verifier: Arc<dyn SignatureVerifier>,
        trusted_key: String,
        local_minimum_platform_version: u32,
    ) -> Self {
        Self {
            store,
            verifier,
            trusted_key,
            local_minimum_platform_version,
            pinned: RwLock::new(None),
        }
    }

    /// Re-pin parameters persisted by an earlier run. Returns whether the
    /// store held valid parameters.
    pub async fn restore(&self) -> Result<bool, NodemapError> {
        let signed = match self.store.load_parameters().await? {
            Some(signed) => signed,
            None => return Ok(false),
        };
        let parameters = signed
            .verify(self.verifier.as_ref(), &self.trusted_key)?
            .clone();
        self.check_compatibility(&parameters)?;
        let hash = parameters.hash()?;
        info!(%hash, epoch = parameters.epoch, "Restored pinned network parameters from store");
        *self.pinned.write() = Some(Pinned { hash, parameters });
        Ok(true)
    }

    /// Handle a parameters hash advertised by the directory service. Pins
    /// on first observation; afterwards only confirms the pin.
    pub async fn observe(
        &self,
        observed_hash: &str,
        transport: &dyn MessagingTransport,
        remote: &str,
    ) -> Result<(), NodemapError> {
        if let Some(pinned) = self.pinned.read().clone() {
            if pinned.hash != observed_hash {
                return Err(NodemapError::ParametersMismatch {
                    expected: pinned.hash,
                    observed: observed_hash.to_string(),
                });
            }
            return Ok(());
        }

        let request = ParametersRequest {
            reply_to: transport.local_address(),
        };
        let reply = transport
            .request(PARAMETERS_TOPIC, serde_json::to_vec(&request)?, remote)
            .await?;
        let response: ParametersResponse = serde_json::from_slice(&reply)?;
        let signed = response.signed_parameters;

        let parameters = signed
            .verify(self.verifier.as_ref(), &self.trusted_key)?
            .clone();
        self.check_compatibility(&parameters)?;

        // The fetched document must be the one the service advertised.
        let hash = parameters.hash()?;
        if hash != observed_hash {
            return Err(NodemapError::ParametersMismatch {
                expected: observed_hash.to_string(),
                observed: hash,
            });
        }

        let mut tx = self.store.begin().await?;
        self.store.save_parameters(&mut tx, &hash, &signed).await?;
        tx.commit().await?;

        info!(%hash, epoch = parameters.epoch, "Pinned network parameters");
        *self.pinned.write() = Some(Pinned { hash, parameters });
        Ok(())
    }

    fn check_compatibility(&self, parameters: &NetworkParameters) -> Result<(), NodemapError> {
        if self.local_minimum_platform_version > parameters.minimum_platform_version {
            return Err(NodemapError::IncompatiblePlatformVersion {
                local: self.local_minimum_platform_version,
                network: parameters.minimum_platform_version,
            });
        }
        Ok(())
    }

    pub fn pinned_hash(&self) -> Option<String> {
        self.pinned.read().as_ref().map(|p| p.hash.clone())
    }

    pub fn parameters(&self) -> Option<NetworkParameters> {
        self.pinned.read().as_ref().map(|p| p.parameters.clone())
    }

    pub fn notary_identities(&self) -> Vec<NotaryRecord> {
        self.pinned
            .read()
            .as_ref()
            .map(|p| p.parameters.notaries.clone())
            .unwrap_or_default()
    }

    pub fn validating_notary_identities(&self) -> Vec<NotaryRecord> {
        self.notary_identities()
            .into_iter()
            .filter(|n| n.validating)
            .collect()
    }
}
