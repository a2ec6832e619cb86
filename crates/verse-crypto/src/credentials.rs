//! Login credential blocks.
//!
//! Name and password share one plaintext block, each in a zero-terminated
//! field of half the block width:
//!
//! ```text
//! 0                 32                 63
//! | name ... \0 pad | password ... \0 pad|0|
//! ```
//!
//! The last byte is the block's most significant byte and is always zero.

use crate::{BLOCK_HIGH_BYTE, BLOCK_SIZE, Block};

/// Width of the name and password fields
pub const CREDENTIAL_FIELD_SIZE: usize = BLOCK_SIZE / 2;

/// Longest name or password that survives packing, in bytes
pub const MAX_CREDENTIAL_LEN: usize = CREDENTIAL_FIELD_SIZE - 1;

/// Pack `name` and `password` into one plaintext block.
///
/// Longer values are truncated to [`MAX_CREDENTIAL_LEN`] bytes on a UTF-8
/// character boundary.
#[must_use]
pub fn pack_credentials(name: &str, password: &str) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    let name = truncate(name);
    let password = truncate(password);
    block[..name.len()].copy_from_slice(name.as_bytes());
    block[CREDENTIAL_FIELD_SIZE..CREDENTIAL_FIELD_SIZE + password.len()]
        .copy_from_slice(password.as_bytes());
    block[BLOCK_HIGH_BYTE] = 0;
    block
}

/// Split a decrypted block back into `(name, password)`.
///
/// Invalid UTF-8 (e.g. a block decrypted with the wrong key) is replaced
/// lossily; there is no way to detect it.
#[must_use]
pub fn unpack_credentials(block: &Block) -> (String, String) {
    let (name, password) = block.split_at(CREDENTIAL_FIELD_SIZE);
    (read_field(name), read_field(password))
}

/// Truncate `value` to the longest prefix that fits a credential field.
#[must_use]
pub fn truncate(value: &str) -> &str {
    if value.len() <= MAX_CREDENTIAL_LEN {
        return value;
    }
    let mut end = MAX_CREDENTIAL_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn read_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let block = pack_credentials("alice", "hunter2");
        assert_eq!(block[BLOCK_HIGH_BYTE], 0);
        assert_eq!(
            unpack_credentials(&block),
            ("alice".to_string(), "hunter2".to_string())
        );
    }

    #[test]
    fn test_field_layout() {
        let block = pack_credentials("ab", "cd");
        assert_eq!(&block[..3], b"ab\0");
        assert_eq!(&block[CREDENTIAL_FIELD_SIZE..CREDENTIAL_FIELD_SIZE + 3], b"cd\0");
    }

    #[test]
    fn test_long_values_are_truncated() {
        let long = "x".repeat(40);
        let (name, password) = unpack_credentials(&pack_credentials(&long, &long));
        assert_eq!(name.len(), MAX_CREDENTIAL_LEN);
        assert_eq!(password.len(), MAX_CREDENTIAL_LEN);
        assert_eq!(pack_credentials(&long, &long)[BLOCK_HIGH_BYTE], 0);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 30 ASCII bytes then a 2-byte character straddling the limit
        let value = format!("{}é", "a".repeat(30));
        assert_eq!(truncate(&value), "a".repeat(30));
    }

    #[test]
    fn test_empty_credentials() {
        let block = pack_credentials("", "");
        assert_eq!(block, [0u8; BLOCK_SIZE]);
        assert_eq!(unpack_credentials(&block), (String::new(), String::new()));
    }
}
