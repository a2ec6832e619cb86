//! # Verse Crypto
//!
//! Key exchange primitives for the Verse session protocol.
//!
//! This crate provides:
//! - Ephemeral login keypairs (textbook RSA over 512-bit moduli)
//! - Fixed-size block encryption and decryption
//! - Packing of login credentials into a single plaintext block
//! - Symmetric data keys and the keystream cipher used after the handshake
//!
//! ## Block format
//!
//! Every key component and ciphertext is a [`Block`] of [`BLOCK_SIZE`] bytes
//! holding a little-endian integer, so the most significant byte is the
//! block's last byte. Plaintext blocks always carry zero in that byte, which
//! keeps them strictly below any modulus produced by [`KeyPair::generate`].
//!
//! ## Known gap
//!
//! Neither the login blocks nor the data cipher carry an integrity check.
//! Decrypting with the wrong key yields garbage that cannot be told apart
//! from valid but odd credentials; peers speaking the existing wire format
//! depend on this layout, so no MAC is added here.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod data;
pub mod error;
pub mod login;
pub mod random;

pub use credentials::{pack_credentials, unpack_credentials};
pub use data::DataKey;
pub use error::CryptoError;
pub use login::{KeyPair, PrivateKey, PublicKey};

/// Size of a key block in bytes
pub const BLOCK_SIZE: usize = 64;

/// Modulus size in bits
pub const MODULUS_BITS: u64 = (BLOCK_SIZE as u64) * 8;

/// A fixed-size little-endian integer block
pub type Block = [u8; BLOCK_SIZE];

/// Index of the most significant byte of a block
pub const BLOCK_HIGH_BYTE: usize = BLOCK_SIZE - 1;
