//! Ephemeral login keypairs.
//!
//! Each connection attempt generates a fresh keypair. The client's public
//! key protects the data key the host sends back; the host's public key
//! protects the client's credentials. Encryption and decryption are the
//! same modular exponentiation with the public or the private exponent.

use crate::{BLOCK_HIGH_BYTE, BLOCK_SIZE, Block, CryptoError, MODULUS_BITS};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand_core::{CryptoRng, OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Public exponent used for every generated keypair
const PUBLIC_EXPONENT: u32 = 65_537;

/// Miller-Rabin rounds per prime candidate
const MILLER_RABIN_ROUNDS: usize = 32;

const SMALL_PRIMES: [u32; 24] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Public half of a login keypair
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    exponent: Block,
    modulus: Block,
}

/// Private half of a login keypair
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    exponent: Block,
    modulus: Block,
}

/// A login keypair, generated once per session attempt
#[derive(Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl PublicKey {
    /// Rebuild a public key received from a peer.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the modulus is even or
    /// its top byte is zero (padded plaintext blocks would not fit), or if
    /// the exponent is zero or one.
    pub fn from_parts(exponent: Block, modulus: Block) -> Result<Self, CryptoError> {
        let e = BigUint::from_bytes_le(&exponent);
        if modulus[BLOCK_HIGH_BYTE] == 0 || modulus[0] & 1 == 0 || e <= BigUint::one() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Self { exponent, modulus })
    }

    /// Public exponent block
    #[must_use]
    pub fn exponent(&self) -> &Block {
        &self.exponent
    }

    /// Modulus block
    #[must_use]
    pub fn modulus(&self) -> &Block {
        &self.modulus
    }

    /// Short hex fingerprint of the modulus, for log lines
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.modulus[BLOCK_SIZE - 8..])
    }

    /// Encrypt one plaintext block.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BlockTooLarge`] if the plaintext, read as an
    /// integer, is not strictly smaller than the modulus.
    pub fn encrypt(&self, plaintext: &Block) -> Result<Block, CryptoError> {
        let m = BigUint::from_bytes_le(plaintext);
        let n = BigUint::from_bytes_le(&self.modulus);
        if m >= n {
            return Err(CryptoError::BlockTooLarge);
        }
        let e = BigUint::from_bytes_le(&self.exponent);
        Ok(to_block(&m.modpow(&e, &n)))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PrivateKey {
    /// Decrypt one ciphertext block.
    ///
    /// Any block decrypts to something; a ciphertext made for another key
    /// yields garbage rather than an error.
    #[must_use]
    pub fn decrypt(&self, ciphertext: &Block) -> Block {
        let n = BigUint::from_bytes_le(&self.modulus);
        let c = BigUint::from_bytes_le(ciphertext) % &n;
        let d = BigUint::from_bytes_le(&self.exponent);
        to_block(&c.modpow(&d, &n))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl KeyPair {
    /// Generate a keypair from the OS CSPRNG
    #[must_use]
    pub fn random() -> Self {
        Self::generate(&mut OsRng)
    }

    /// Generate a keypair with a 512-bit modulus.
    ///
    /// Both primes have their two top bits set, so the modulus always has
    /// its top bit set and any block with a zero high byte is below it.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let e = BigUint::from(PUBLIC_EXPONENT);
        let prime_bits = MODULUS_BITS / 2;

        loop {
            let p = generate_prime(rng, prime_bits);
            let q = generate_prime(rng, prime_bits);
            if p == q {
                continue;
            }

            let phi = (p.clone() - 1u32) * (q.clone() - 1u32);
            // gcd(e, phi) != 1, try another pair
            let Some(d) = e.modinv(&phi) else {
                continue;
            };

            let modulus = to_block(&(p * q));
            return Self {
                private: PrivateKey {
                    exponent: to_block(&d),
                    modulus,
                },
                public: PublicKey {
                    exponent: to_block(&e),
                    modulus,
                },
            };
        }
    }

    /// Public key to send to the peer
    #[must_use]
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Private key, never leaves this process
    #[must_use]
    pub fn private(&self) -> &PrivateKey {
        &self.private
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

fn to_block(value: &BigUint) -> Block {
    let bytes = value.to_bytes_le();
    let mut block = [0u8; BLOCK_SIZE];
    let len = bytes.len().min(BLOCK_SIZE);
    block[..len].copy_from_slice(&bytes[..len]);
    block
}

fn generate_prime<R: RngCore + CryptoRng>(rng: &mut R, bits: u64) -> BigUint {
    let top = (BigUint::one() << (bits - 1)) | (BigUint::one() << (bits - 2));
    loop {
        let candidate = rng.gen_biguint(bits) | &top | BigUint::one();
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

fn is_probable_prime<R: RngCore + CryptoRng>(n: &BigUint, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }
    if (n % &two).is_zero() {
        return false;
    }

    let n_minus_one = n.clone() - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = n_minus_one.clone() >> s;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
