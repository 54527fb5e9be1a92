//! Directory error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodemapError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid network address: {0}")]
    InvalidAddress(String),

    #[error("Malformed node record: {0}")]
    MalformedRecord(String),

    #[error("Network parameters mismatch: expected {expected}, observed {observed}")]
    ParametersMismatch { expected: String, observed: String },

    #[error(
        "Local minimum platform version {local} exceeds network minimum {network}"
    )]
    IncompatiblePlatformVersion { local: u32, network: u32 },

    #[error("Unknown party: {0}")]
    UnknownParty(String),

    #[error("Deregistration refused for party: {0}")]
    DeregistrationRefused(String),

    #[error("Duplicate address binding: {0}")]
    DuplicateAddress(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodemapError::UnknownParty("abc123".to_string());
        assert!(err.to_string().contains("abc123"));

        let err = NodemapError::ParametersMismatch {
            expected: "aaaa".to_string(),
            observed: "bbbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));

        let err = NodemapError::IncompatiblePlatformVersion {
            local: 5,
            network: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("5"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_error_variants_display() {
        let errors: Vec<NodemapError> = vec![
            NodemapError::InvalidSignature("bad sig".to_string()),
            NodemapError::InvalidPublicKey("bad key".to_string()),
            NodemapError::InvalidAddress("no port".to_string()),
            NodemapError::MalformedRecord("no identities".to_string()),
            NodemapError::UnknownParty("party".to_string()),
            NodemapError::DeregistrationRefused("party".to_string()),
            NodemapError::DuplicateAddress("10.0.0.1:10000".to_string()),
            NodemapError::Transport("unreachable".to_string()),
            NodemapError::ChannelClosed,
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: Result<String, serde_json::Error> = serde_json::from_str("not json");
        let err: NodemapError = json_result.unwrap_err().into();
        assert!(matches!(err, NodemapError::Json(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: NodemapError = io_err.into();
        assert!(matches!(err, NodemapError::Io(_)));
    }
}
