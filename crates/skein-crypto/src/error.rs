//! Error types for skein-crypto.

use thiserror::Error;

/// Errors from key handling and the stream key exchange.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Byte string is not a valid ed25519 public key.
    #[error("invalid public key bytes")]
    InvalidPublicKey,

    /// Signature did not verify under the given public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// Hex string could not be decoded into the expected width.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// Raw byte slice has the wrong length for the target type.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length supplied.
        actual: usize,
    },

    /// Key-exchange library failure.
    #[error("key exchange error: {0}")]
    Kex(String),
}

impl From<snow::Error> for CryptoError {
    fn from(e: snow::Error) -> Self {
        CryptoError::Kex(e.to_string())
    }
}
