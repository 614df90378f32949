//! veil-cipher: the encryption core of veilfs
//!
//! Transparent encryption between a logical file namespace and an untrusted
//! object store: deterministic name encryption plus streaming authenticated
//! encryption of contents in fixed-size blocks.
//!
//! File container formats:
//! ```text
//! V1: magic "RCLONE\x00\x00" (8) | nonce (24) | block 0..N
//! V2: magic "RCLONE\x00\x01" (8) | nonce (23) + reserved (1) | wrapped CEK (48)
//!     | block 0..N | hash marker (1) + sealed MD5 (32)
//!
//! block: up to 64 KiB of plaintext sealed with XSalsa20-Poly1305 (16-byte tag),
//!        nonce = file nonce + block index; the final block's nonce carries the
//!        last-block flag so EOF is authenticated
//! ```
//!
//! Key hierarchy:
//! ```text
//! passphrase (+ optional salt passphrase)
//!   └── scrypt (N=16384, r=8, p=1) → 80 bytes
//!         ├── data key (32): seals V1 blocks, wraps the V2 CEK
//!         ├── name key (32): keys the EME name cipher
//!         └── name tweak (16): personalizes name encryption per deployment
//! V2 only: CEK (per-object, 32-byte random) seals blocks and the hash footer
//! ```

pub mod decrypt;
pub mod encoding;
pub mod encrypt;
pub mod error;
pub mod kdf;
pub mod names;
pub mod nonce;
pub mod secretbox;
pub mod sizes;

mod eme;
mod obfuscate;

pub use decrypt::{DataDecrypter, PlaintextHash, RangeSource};
pub use encoding::NameEncoding;
pub use encrypt::DataEncrypter;
pub use error::{CryptoError, KdfError, NameError, SizeError};
pub use kdf::MasterKeys;
pub use nonce::Nonce;

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use zeroize::Zeroize;

/// Identifies a V1 container.
pub const FILE_MAGIC_V1: &[u8; 8] = b"RCLONE\x00\x00";
/// Identifies a V2 container.
pub const FILE_MAGIC_V2: &[u8; 8] = b"RCLONE\x00\x01";

/// Poly1305 authentication tag length
pub const TAG_SIZE: usize = 16;
/// Size of a content encryption key
pub const CEK_SIZE: usize = 32;
/// Size of the sealed CEK stored in a V2 header
pub const WRAPPED_CEK_SIZE: usize = CEK_SIZE + TAG_SIZE;

/// V1 header: magic + nonce
pub const FILE_HEADER_SIZE_V1: usize = 8 + nonce::NONCE_SIZE;
/// V2 header: magic + nonce + wrapped CEK
pub const FILE_HEADER_SIZE_V2: usize = FILE_HEADER_SIZE_V1 + WRAPPED_CEK_SIZE;

/// Plaintext bytes per block
pub const BLOCK_DATA_SIZE: usize = 64 * 1024;
/// Ciphertext bytes per block (plaintext + tag)
pub const BLOCK_CIPHER_SIZE: usize = BLOCK_DATA_SIZE + TAG_SIZE;

/// Length of the plaintext hash stored in the V2 footer (MD5)
pub const PLAINTEXT_HASH_SIZE: usize = 16;
/// V2 footer: hash marker byte + sealed hash
pub const FILE_FOOTER_SIZE_V2: usize = 1 + PLAINTEXT_HASH_SIZE + TAG_SIZE;

/// Footer marker: no plaintext hash stored
pub const HASH_MARKER_NONE: u8 = 0x00;
/// Footer marker: MD5 of the plaintext
pub const HASH_MARKER_MD5: u8 = 0x01;

/// Container format version.
///
/// V1 seals blocks directly under the master data key. V2 wraps a fresh
/// per-object CEK so the key for a single object can be disclosed without
/// giving away the master key, and appends a sealed plaintext hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherVersion {
    V1,
    V2,
}

impl CipherVersion {
    pub fn header_size(self) -> usize {
        match self {
            CipherVersion::V1 => FILE_HEADER_SIZE_V1,
            CipherVersion::V2 => FILE_HEADER_SIZE_V2,
        }
    }

    pub fn footer_size(self) -> usize {
        match self {
            CipherVersion::V1 => 0,
            CipherVersion::V2 => FILE_FOOTER_SIZE_V2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CipherVersion::V1 => "v1",
            CipherVersion::V2 => "v2",
        }
    }
}

impl std::str::FromStr for CipherVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(CipherVersion::V1),
            "v2" => Ok(CipherVersion::V2),
            other => Err(format!("unknown cipher version {other:?}")),
        }
    }
}

/// How path segments are transformed on their way to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMode {
    /// Deterministic authenticated encryption per segment (EME + encoding)
    #[default]
    Standard,
    /// Keyed, reversible scramble; no authentication
    Obfuscate,
    /// Identity; the configured suffix still marks encrypted files
    Off,
}

impl std::str::FromStr for NameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(NameMode::Standard),
            "obfuscate" => Ok(NameMode::Obfuscate),
            "off" => Ok(NameMode::Off),
            other => Err(format!("unknown filename encryption mode {other:?}")),
        }
    }
}

/// Name handling configuration, immutable once the cipher is built.
#[derive(Debug, Clone)]
pub struct NameConfig {
    pub mode: NameMode,
    pub encoding: NameEncoding,
    /// Encrypt directory segments as well as file leaf names
    pub encrypt_dir_names: bool,
    /// Appended to encrypted file names, stripped and required on decrypt
    pub suffix: String,
}

impl Default for NameConfig {
    fn default() -> Self {
        Self {
            mode: NameMode::Standard,
            encoding: NameEncoding::Base32,
            encrypt_dir_names: true,
            suffix: ".bin".into(),
        }
    }
}

/// A per-object content encryption key (V2). Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Cek {
    bytes: [u8; CEK_SIZE],
}

impl Cek {
    pub fn from_bytes(bytes: [u8; CEK_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; CEK_SIZE] {
        &self.bytes
    }

    /// Generate a random CEK from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; CEK_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for Cek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Cek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cek").field("bytes", &"[REDACTED]").finish()
    }
}

/// The cipher: master key material plus the immutable transform settings.
///
/// Safe to share between concurrent streams; each encrypter/decrypter owns
/// its own nonce and buffers.
pub struct Cipher {
    keys: MasterKeys,
    names: NameConfig,
    version: CipherVersion,
    pass_bad_blocks: bool,
    eme: eme::Eme,
    obfuscator: obfuscate::Obfuscator,
}

impl Cipher {
    /// Derive master keys from the passphrases and build a cipher.
    pub fn new(
        password: &SecretString,
        salt: Option<&SecretString>,
        names: NameConfig,
        version: CipherVersion,
    ) -> Result<Self, KdfError> {
        let keys = kdf::derive_master_keys(password, salt)?;
        Ok(Self::from_keys(keys, names, version))
    }

    /// Build a cipher from already-derived key material.
    pub fn from_keys(keys: MasterKeys, names: NameConfig, version: CipherVersion) -> Self {
        let eme = eme::Eme::new(keys.name_key());
        let obfuscator = obfuscate::Obfuscator::new(keys.name_key(), keys.name_tweak());
        Self {
            keys,
            names,
            version,
            pass_bad_blocks: false,
            eme,
            obfuscator,
        }
    }

    pub fn with_pass_bad_blocks(mut self, pass_bad_blocks: bool) -> Self {
        self.pass_bad_blocks = pass_bad_blocks;
        self
    }

    pub fn version(&self) -> CipherVersion {
        self.version
    }

    pub fn name_mode(&self) -> NameMode {
        self.names.mode
    }

    pub fn pass_bad_blocks(&self) -> bool {
        self.pass_bad_blocks
    }

    pub(crate) fn data_key(&self) -> &[u8; 32] {
        self.keys.data_key()
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("names", &self.names)
            .field("version", &self.version)
            .field("pass_bad_blocks", &self.pass_bad_blocks)
            .finish_non_exhaustive()
    }
}
