//! Symmetric data key and post-handshake traffic cipher.
//!
//! The host generates a data key per session and sends it to the client
//! encrypted under the client's login public key. Afterwards every
//! sequenced datagram is masked with a keystream drawn from the data key
//! at an offset given by the datagram's packet id. Applying the cipher
//! twice with the same packet id restores the input.

use crate::random::fill_random;
use crate::{BLOCK_HIGH_BYTE, BLOCK_SIZE, Block, CryptoError};
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a data key in bytes (one block)
pub const DATA_KEY_SIZE: usize = BLOCK_SIZE;

// The forced-zero high byte is not part of the keystream
const KEYSTREAM_LEN: usize = DATA_KEY_SIZE - 1;

/// Symmetric key negotiated for bulk traffic
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DataKey(Block);

impl DataKey {
    /// Generate a data key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn random() -> Result<Self, CryptoError> {
        let mut block = [0u8; DATA_KEY_SIZE];
        fill_random(&mut block[..KEYSTREAM_LEN])?;
        Ok(Self(block))
    }

    /// Generate a data key from `rng`
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut block = [0u8; DATA_KEY_SIZE];
        rng.fill_bytes(&mut block[..KEYSTREAM_LEN]);
        Self(block)
    }

    /// Rebuild a key from a decrypted block.
    ///
    /// The high byte is cleared so the key is always encryptable again.
    #[must_use]
    pub fn from_block(mut block: Block) -> Self {
        block[BLOCK_HIGH_BYTE] = 0;
        Self(block)
    }

    /// The key as a plaintext block (high byte zero)
    #[must_use]
    pub fn as_block(&self) -> &Block {
        &self.0
    }

    /// Mask or unmask `data` in place for the datagram `packet_id`
    pub fn apply(&self, packet_id: u32, data: &mut [u8]) {
        let start = packet_id as usize % KEYSTREAM_LEN;
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.0[(start + i) % KEYSTREAM_LEN];
        }
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_high_byte_is_zero() {
        let key = DataKey::generate(&mut OsRng);
        assert_eq!(key.as_block()[BLOCK_HIGH_BYTE], 0);
        assert_eq!(DataKey::random().unwrap().as_block()[BLOCK_HIGH_BYTE], 0);
        assert_eq!(
            DataKey::from_block([0xFF; DATA_KEY_SIZE]).as_block()[BLOCK_HIGH_BYTE],
            0
        );
    }

    #[test]
    fn test_apply_twice_restores() {
        let key = DataKey::generate(&mut OsRng);
        let original: Vec<u8> = (0..200u8).collect();
        let mut data = original.clone();

        key.apply(17, &mut data);
        assert_ne!(data, original);
        key.apply(17, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_packet_id_shifts_keystream() {
        let key = DataKey::generate(&mut OsRng);
        let mut a = vec![0u8; 32];
        let mut b = vec![0u8; 32];
        key.apply(1, &mut a);
        key.apply(2, &mut b);
        assert_eq!(a[1..], b[..31]);
    }

    #[test]
    fn test_wrong_packet_id_does_not_restore() {
        let key = DataKey::generate(&mut OsRng);
        let original = b"node create".to_vec();
        let mut data = original.clone();
        key.apply(5, &mut data);
        key.apply(6, &mut data);
        assert_ne!(data, original);
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = DataKey::generate(&mut OsRng);
        assert_eq!(format!("{:?}", key), "DataKey([REDACTED])");
    }
}
