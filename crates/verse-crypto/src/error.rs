//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// Plaintext is not strictly smaller than the modulus
    #[error("plaintext block is not smaller than the modulus")]
    BlockTooLarge,

    /// Slice does not have the length of a block
    #[error("invalid block length: expected {expected}, got {actual}")]
    InvalidBlockLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Public key material cannot be used for encryption
    #[error("invalid public key")]
    InvalidPublicKey,
}
