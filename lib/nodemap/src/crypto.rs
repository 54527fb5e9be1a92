//! Signature verification seam and content hashing.
//!
//! Signing and verification are consumed as a capability: components that
//! check record or parameter signatures take a [`SignatureVerifier`] and
//! never commit to an algorithm. [`Ed25519Verifier`] is the reference
//! implementation; keys and signatures travel hex-encoded.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::NodemapError;

/// Verifies a detached signature over a message.
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        public_key_hex: &str,
        message: &[u8],
        signature_hex: &str,
    ) -> Result<(), NodemapError>;
}

/// Ed25519 verification for hex-encoded keys and signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        public_key_hex: &str,
        message: &[u8],
        signature_hex: &str,
    ) -> Result<(), NodemapError> {
        let key_bytes: [u8; 32] = hex::decode(public_key_hex)
            .map_err(|e| NodemapError::InvalidPublicKey(e.to_string()))?
            .try_into()
            .map_err(|_| NodemapError::InvalidPublicKey("expected 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| NodemapError::InvalidPublicKey(e.to_string()))?;

        let sig_bytes: [u8; 64] = hex::decode(signature_hex)
            .map_err(|e| NodemapError::InvalidSignature(e.to_string()))?
            .try_into()
            .map_err(|_| NodemapError::InvalidSignature("expected 64 bytes".to_string()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(message, &signature)
            .map_err(|_| NodemapError::InvalidSignature("verification failed".to_string()))
    }
}

/// Ed25519 signing key, used by nodes publishing their own records and by
/// the network operator sealing parameters.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

/// BLAKE3 content hash, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Storage and cache key for an identity: BLAKE3 over its hex public key.
pub fn key_hash(public_key_hex: &str) -> String {
    content_hash(public_key_hex.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = Ed25519Signer::from_seed(test_seed(1));
        let message = b"directory record";
        let signature = signer.sign_hex(message);

        let verifier = Ed25519Verifier;
        assert!(verifier
            .verify(&signer.public_key_hex(), message, &signature)
            .is_ok());
    }

    #[test]
    fn test_verify_wrong_message_fails() {
        let signer = Ed25519Signer::from_seed(test_seed(2));
        let signature = signer.sign_hex(b"original");

        let verifier = Ed25519Verifier;
        let result = verifier.verify(&signer.public_key_hex(), b"tampered", &signature);
        assert!(matches!(result, Err(NodemapError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let signer = Ed25519Signer::from_seed(test_seed(3));
        let other = Ed25519Signer::from_seed(test_seed(4));
        let message = b"payload";
        let signature = signer.sign_hex(message);

        let verifier = Ed25519Verifier;
        let result = verifier.verify(&other.public_key_hex(), message, &signature);
        assert!(matches!(result, Err(NodemapError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_malformed_key() {
        let verifier = Ed25519Verifier;
        let result = verifier.verify("not-hex", b"payload", "00");
        assert!(matches!(result, Err(NodemapError::InvalidPublicKey(_))));

        let result = verifier.verify("abcd", b"payload", "00");
        assert!(matches!(result, Err(NodemapError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_verify_malformed_signature() {
        let signer = Ed25519Signer::from_seed(test_seed(5));
        let verifier = Ed25519Verifier;
        let result = verifier.verify(&signer.public_key_hex(), b"payload", "zzzz");
        assert!(matches!(result, Err(NodemapError::InvalidSignature(_))));

        let result = verifier.verify(&signer.public_key_hex(), b"payload", "0011");
        assert!(matches!(result, Err(NodemapError::InvalidSignature(_))));
    }

    #[test]
    fn test_content_hash_deterministic() {
        let a = content_hash(b"same input");
        let b = content_hash(b"same input");
        assert_eq!(a, b);
        assert_ne!(a, content_hash(b"other input"));
        // BLAKE3 produces a 32-byte digest, 64 hex characters.
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_key_hash_distinct_keys() {
        let a = Ed25519Signer::from_seed(test_seed(6));
        let b = Ed25519Signer::from_seed(test_seed(7));
        assert_ne!(key_hash(&a.public_key_hex()), key_hash(&b.public_key_hex()));
    }
}
