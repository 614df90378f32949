//! Sealed-box AEAD primitive: XSalsa20-Poly1305 over a 32-byte key and a
//! 24-byte nonce. Deterministic given its inputs; the 16-byte Poly1305 tag
//! leads the ciphertext (NaCl secretbox layout).

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use thiserror::Error;

use crate::nonce::Nonce;

pub const KEY_SIZE: usize = 32;
pub const TAG_SIZE: usize = 16;

/// Authentication failure while opening a sealed box.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("authentication failed")]
pub struct AuthError;

/// Seal `plaintext` under `key` and `nonce`.
///
/// Output length is always `plaintext.len() + TAG_SIZE`.
pub fn seal(key: &[u8; KEY_SIZE], nonce: &Nonce, plaintext: &[u8]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .encrypt(nonce.as_bytes().into(), plaintext)
        .expect("sealing cannot fail for block-sized inputs")
}

/// Open a sealed box. Fails if the key, nonce or ciphertext don't match.
pub fn open(key: &[u8; KEY_SIZE], nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, AuthError> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .decrypt(nonce.as_bytes().into(), ciphertext)
        .map_err(|_| AuthError)
}
