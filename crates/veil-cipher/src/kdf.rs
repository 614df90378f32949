//! Key derivation: scrypt passphrase → master key material
//!
//! A single scrypt invocation yields 80 bytes, split into the data key,
//! the name key and the name tweak. The salt is the secondary passphrase
//! when configured, otherwise a fixed application constant, so that a
//! passphrase alone always reproduces the same keys.

use scrypt::{scrypt, Params};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::KdfError;

pub const DATA_KEY_SIZE: usize = 32;
pub const NAME_KEY_SIZE: usize = 32;
pub const NAME_TWEAK_SIZE: usize = 16;

const DERIVED_LEN: usize = DATA_KEY_SIZE + NAME_KEY_SIZE + NAME_TWEAK_SIZE;

// scrypt cost parameters: N = 2^14, r = 8, p = 1
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Salt used when no salt passphrase is configured.
const DEFAULT_SALT: [u8; 16] = [
    0xA8, 0x0D, 0xF4, 0x3A, 0x8F, 0xBD, 0x03, 0x08, 0xA7, 0xCA, 0xB8, 0x3E, 0x58, 0x1F, 0x86,
    0xB1,
];

/// Master key material derived once per configured store.
///
/// Zeroized on drop so secrets don't linger in memory.
#[derive(Clone)]
pub struct MasterKeys {
    data_key: [u8; DATA_KEY_SIZE],
    name_key: [u8; NAME_KEY_SIZE],
    name_tweak: [u8; NAME_TWEAK_SIZE],
}

impl MasterKeys {
    pub fn from_bytes(
        data_key: [u8; DATA_KEY_SIZE],
        name_key: [u8; NAME_KEY_SIZE],
        name_tweak: [u8; NAME_TWEAK_SIZE],
    ) -> Self {
        Self {
            data_key,
            name_key,
            name_tweak,
        }
    }

    pub fn data_key(&self) -> &[u8; DATA_KEY_SIZE] {
        &self.data_key
    }

    pub fn name_key(&self) -> &[u8; NAME_KEY_SIZE] {
        &self.name_key
    }

    pub fn name_tweak(&self) -> &[u8; NAME_TWEAK_SIZE] {
        &self.name_tweak
    }
}

impl Drop for MasterKeys {
    fn drop(&mut self) {
        self.data_key.zeroize();
        self.name_key.zeroize();
        self.name_tweak.zeroize();
    }
}

impl std::fmt::Debug for MasterKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeys")
            .field("data_key", &"[REDACTED]")
            .field("name_key", &"[REDACTED]")
            .field("name_tweak", &"[REDACTED]")
            .finish()
    }
}

/// Derive the master keys from a passphrase and optional salt passphrase.
///
/// Pure and deterministic: the same inputs always produce the same keys.
pub fn derive_master_keys(
    password: &SecretString,
    salt: Option<&SecretString>,
) -> Result<MasterKeys, KdfError> {
    if password.expose_secret().is_empty() {
        return Err(KdfError::EmptyPassword);
    }

    let params =
        Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P).map_err(|_| KdfError::BadParams)?;

    let mut derived = [0u8; DERIVED_LEN];
    let result = match salt {
        Some(s) if !s.expose_secret().is_empty() => scrypt(
            password.expose_secret().as_bytes(),
            s.expose_secret().as_bytes(),
            &params,
            &mut derived,
        ),
        _ => scrypt(
            password.expose_secret().as_bytes(),
            &DEFAULT_SALT,
            &params,
            &mut derived,
        ),
    };
    result.map_err(|_| KdfError::BadParams)?;

    let mut data_key = [0u8; DATA_KEY_SIZE];
    let mut name_key = [0u8; NAME_KEY_SIZE];
    let mut name_tweak = [0u8; NAME_TWEAK_SIZE];
    data_key.copy_from_slice(&derived[..DATA_KEY_SIZE]);
    name_key.copy_from_slice(&derived[DATA_KEY_SIZE..DATA_KEY_SIZE + NAME_KEY_SIZE]);
    name_tweak.copy_from_slice(&derived[DATA_KEY_SIZE + NAME_KEY_SIZE..]);
    derived.zeroize();

    Ok(MasterKeys::from_bytes(data_key, name_key, name_tweak))
}
