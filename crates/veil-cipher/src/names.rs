//! Bijective encryption of path components.
//!
//! Paths are split on `/` and each segment is transformed independently,
//! so listing a directory only ever needs that directory's encrypted name.
//! The directory path is deliberately not part of the tweak: the same leaf
//! name encrypts identically wherever it lives, and renames of parents
//! don't touch children.
//!
//! Standard mode pads each segment with PKCS#7 to a whole number of
//! 16-byte blocks, runs it through EME and encodes the result textually.
//! The configured suffix is appended to encrypted file names (never
//! directory names) and is required when decrypting, which catches
//! objects written by foreign tools before they reach the block cipher.

use crate::error::NameError;
use crate::{eme, Cipher, NameMode};

/// PKCS#7 block size used for segment padding
const PAD_BLOCK: usize = 16;

/// Longest encoded segment we will produce, in UTF-16 code units.
const MAX_ENCODED_UNITS: usize = 255;

impl Cipher {
    /// Encrypt a file path; the final segment gets the configured suffix.
    pub fn encrypt_file_name(&self, path: &str) -> Result<String, NameError> {
        self.encrypt_path(path, true)
    }

    /// Encrypt a directory path. No suffix.
    pub fn encrypt_dir_name(&self, path: &str) -> Result<String, NameError> {
        self.encrypt_path(path, false)
    }

    /// Decrypt a file path, requiring and stripping the suffix.
    pub fn decrypt_file_name(&self, path: &str) -> Result<String, NameError> {
        self.decrypt_path(path, true)
    }

    /// Decrypt a directory path.
    pub fn decrypt_dir_name(&self, path: &str) -> Result<String, NameError> {
        self.decrypt_path(path, false)
    }

    fn encrypt_path(&self, path: &str, is_file: bool) -> Result<String, NameError> {
        if path.is_empty() {
            return Ok(String::new());
        }
        let segments: Vec<&str> = path.split('/').collect();
        let last = segments.len() - 1;

        let mut out = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let encrypt_this = (is_file && i == last) || self.names.encrypt_dir_names;
            out.push(self.encrypt_segment(segment, encrypt_this)?);
        }
        if is_file {
            out[last].push_str(&self.names.suffix);
        }
        Ok(out.join("/"))
    }

    fn decrypt_path(&self, path: &str, is_file: bool) -> Result<String, NameError> {
        if path.is_empty() {
            return Ok(String::new());
        }
        let mut segments: Vec<String> = path.split('/').map(str::to_string).collect();
        let last = segments.len() - 1;

        if is_file && !self.names.suffix.is_empty() {
            match segments[last].strip_suffix(self.names.suffix.as_str()) {
                Some(stripped) => segments[last] = stripped.to_string(),
                None => return Err(NameError::MissingSuffix),
            }
        }

        let mut out = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let decrypt_this = (is_file && i == last) || self.names.encrypt_dir_names;
            out.push(self.decrypt_segment(segment, decrypt_this)?);
        }
        Ok(out.join("/"))
    }

    fn encrypt_segment(&self, segment: &str, encrypt: bool) -> Result<String, NameError> {
        if segment.is_empty() || !encrypt {
            return Ok(segment.to_string());
        }
        match self.names.mode {
            NameMode::Off => Ok(segment.to_string()),
            NameMode::Obfuscate => Ok(self.obfuscator.scramble(segment)),
            NameMode::Standard => {
                let padded = pad(segment.as_bytes());
                if padded.len() > eme::MAX_INPUT {
                    return Err(NameError::TooLong);
                }
                let ciphertext = self.eme.encrypt(self.keys.name_tweak(), &padded);
                let encoded = self.names.encoding.encode(&ciphertext);
                if encoded.encode_utf16().count() > MAX_ENCODED_UNITS {
                    return Err(NameError::TooLong);
                }
                Ok(encoded)
            }
        }
    }

    fn decrypt_segment(&self, segment: &str, decrypt: bool) -> Result<String, NameError> {
        if segment.is_empty() || !decrypt {
            return Ok(segment.to_string());
        }
        match self.names.mode {
            NameMode::Off => Ok(segment.to_string()),
            NameMode::Obfuscate => Ok(self.obfuscator.unscramble(segment)),
            NameMode::Standard => {
                let ciphertext = self.names.encoding.decode(segment)?;
                if ciphertext.is_empty()
                    || ciphertext.len() % PAD_BLOCK != 0
                    || ciphertext.len() > eme::MAX_INPUT
                {
                    return Err(NameError::BadCiphertext);
                }
                let padded = self.eme.decrypt(self.keys.name_tweak(), &ciphertext);
                let plaintext = unpad(padded)?;
                String::from_utf8(plaintext).map_err(|_| NameError::BadCiphertext)
            }
        }
    }
}

/// PKCS#7: always pads, adding a whole block for exact multiples.
fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = PAD_BLOCK - data.len() % PAD_BLOCK;
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

/// Strict PKCS#7 validation: a bad pad means the ciphertext didn't decrypt
/// under our key, so the whole segment is rejected.
fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>, NameError> {
    let pad_len = *data.last().ok_or(NameError::BadCiphertext)? as usize;
    if pad_len == 0 || pad_len > PAD_BLOCK || pad_len > data.len() {
        return Err(NameError::BadCiphertext);
    }
    if !data[data.len() - pad_len..].iter().all(|&b| b == pad_len as u8) {
        return Err(NameError::BadCiphertext);
    }
    data.truncate(data.len() - pad_len);
    Ok(data)
}
