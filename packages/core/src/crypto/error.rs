//! Encryption error types

use thiserror::Error;

/// Field encryption failures
///
/// Always fatal: a field is either fully transformed or the operation fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("No encryption key configured for encrypted field {field}")]
    MissingKey { field: String },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}
