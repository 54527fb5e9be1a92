//! Directory configuration.
//!
//! A plain data struct: loading it from disk or environment is the
//! embedding node's concern.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::SignatureVerifier;
use crate::params::ParameterNegotiator;
use crate::store::DirectoryStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryConfig {
    /// Hex-encoded Ed25519 key trusted to sign network parameters.
    pub trusted_parameters_key: String,
    /// Lowest platform version this node is willing to operate at.
    pub local_minimum_platform_version: u32,
    /// Buffered capacity of the change feed.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// Directory watched for out-of-band signed record files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_drop_dir: Option<PathBuf>,
}

fn default_feed_capacity() -> usize {
    256
}

impl DirectoryConfig {
    pub fn negotiator(
        &self,
        store: Arc<DirectoryStore>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> ParameterNegotiator {
        ParameterNegotiator::new(
            store,
            verifier,
            self.trusted_parameters_key.clone(),
            self.local_minimum_platform_version,
        )
    }
}
