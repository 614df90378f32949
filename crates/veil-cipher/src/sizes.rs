//! Bidirectional mapping between plaintext and ciphertext sizes.
//!
//! Every block contributes a fixed 16-byte tag, so sizes convert exactly
//! in both directions; this is what lets listings report decrypted sizes
//! without touching object contents, and seeks address ciphertext byte
//! ranges directly.

use crate::error::SizeError;
use crate::{
    CipherVersion, BLOCK_CIPHER_SIZE, BLOCK_DATA_SIZE, TAG_SIZE,
};

/// Ciphertext size of a `plaintext`-byte object for `version`.
pub fn encrypted_size(plaintext: u64, version: CipherVersion) -> u64 {
    let blocks = plaintext.div_ceil(BLOCK_DATA_SIZE as u64);
    version.header_size() as u64
        + plaintext
        + blocks * TAG_SIZE as u64
        + version.footer_size() as u64
}

/// Plaintext size of a `ciphertext`-byte object for `version`.
///
/// Fails when no plaintext length could have produced `ciphertext`: a
/// body that isn't empty must end in a final block of at least one byte
/// plus its tag.
pub fn decrypted_size(ciphertext: u64, version: CipherVersion) -> Result<u64, SizeError> {
    let overhead = (version.header_size() + version.footer_size()) as u64;
    let body = ciphertext
        .checked_sub(overhead)
        .ok_or(SizeError::BadCiphertextLength(ciphertext))?;

    let full_blocks = body / BLOCK_CIPHER_SIZE as u64;
    let remainder = body % BLOCK_CIPHER_SIZE as u64;

    if remainder == 0 {
        Ok(full_blocks * BLOCK_DATA_SIZE as u64)
    } else if remainder > TAG_SIZE as u64 {
        Ok(full_blocks * BLOCK_DATA_SIZE as u64 + remainder - TAG_SIZE as u64)
    } else {
        Err(SizeError::BadCiphertextLength(ciphertext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FILE_FOOTER_SIZE_V2, FILE_HEADER_SIZE_V1, FILE_HEADER_SIZE_V2};

    const B: u64 = BLOCK_DATA_SIZE as u64;

    #[test]
    fn test_known_sizes_v1() {
        assert_eq!(encrypted_size(0, CipherVersion::V1), 32);
        assert_eq!(encrypted_size(1, CipherVersion::V1), 32 + 17);
        assert_eq!(encrypted_size(B, CipherVersion::V1), 32 + 65552);
        assert_eq!(encrypted_size(B + 1, CipherVersion::V1), 32 + 65552 + 17);
    }

    #[test]
    fn test_known_sizes_v2() {
        assert_eq!(
            encrypted_size(0, CipherVersion::V2),
            (FILE_HEADER_SIZE_V2 + FILE_FOOTER_SIZE_V2) as u64
        );
        assert_eq!(encrypted_size(B, CipherVersion::V2), 80 + 65552 + 33);
    }

    #[test]
    fn test_size_law() {
        for version in [CipherVersion::V1, CipherVersion::V2] {
            for plaintext in [
                0,
                1,
                2,
                16,
                B - 1,
                B,
                B + 1,
                2 * B,
                3 * B + 42,
                1_000_000_007,
            ] {
                assert_eq!(
                    decrypted_size(encrypted_size(plaintext, version), version).unwrap(),
                    plaintext,
                    "{version:?} plaintext {plaintext}"
                );
            }
        }
    }

    #[test]
    fn test_bad_lengths_rejected() {
        // shorter than the header
        assert!(decrypted_size(FILE_HEADER_SIZE_V1 as u64 - 1, CipherVersion::V1).is_err());
        assert!(decrypted_size(0, CipherVersion::V2).is_err());

        // a lone tag with no data byte can't exist
        for tail in 1..=TAG_SIZE as u64 {
            assert!(
                decrypted_size(FILE_HEADER_SIZE_V1 as u64 + tail, CipherVersion::V1).is_err(),
                "tail {tail}"
            );
        }
    }
}
