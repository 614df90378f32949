//! Textual encodings for encrypted name segments.
//!
//! The encoding determines how the EME ciphertext bytes become a legal
//! object name on the remote:
//!
//! - `base32`: lowercase RFC 4648 alphabet without padding, decoded
//!   case-insensitively. Safe everywhere; ~60% expansion.
//! - `base64`: URL-safe alphabet without padding. Shorter, but requires a
//!   case-sensitive store.
//! - `base32768`: 15 bits per character, every character a single UTF-16
//!   code unit. For stores that bound name length in UTF-16 code units.

use std::sync::LazyLock;

use data_encoding::{Encoding, Specification, BASE64URL_NOPAD};

use crate::error::NameError;

static BASE32_LOWER_NOPAD: LazyLock<Encoding> = LazyLock::new(|| {
    let mut spec = Specification::new();
    spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
    spec.translate.from.push_str("ABCDEFGHIJKLMNOPQRSTUVWXYZ");
    spec.translate.to.push_str("abcdefghijklmnopqrstuvwxyz");
    spec.encoding().expect("static base32 specification is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameEncoding {
    #[default]
    Base32,
    Base64,
    Base32768,
}

impl NameEncoding {
    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            NameEncoding::Base32 => BASE32_LOWER_NOPAD.encode(data),
            NameEncoding::Base64 => BASE64URL_NOPAD.encode(data),
            NameEncoding::Base32768 => base32768::encode(data),
        }
    }

    pub fn decode(&self, encoded: &str) -> Result<Vec<u8>, NameError> {
        match self {
            NameEncoding::Base32 => BASE32_LOWER_NOPAD
                .decode(encoded.as_bytes())
                .map_err(|_| NameError::BadEncoding),
            NameEncoding::Base64 => BASE64URL_NOPAD
                .decode(encoded.as_bytes())
                .map_err(|_| NameError::BadEncoding),
            NameEncoding::Base32768 => base32768::decode(encoded),
        }
    }
}

impl std::str::FromStr for NameEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base32" => Ok(NameEncoding::Base32),
            "base64" => Ok(NameEncoding::Base64),
            "base32768" => Ok(NameEncoding::Base32768),
            other => Err(format!("unknown filename encoding {other:?}")),
        }
    }
}

/// Binary-to-text codec packing 15 bits into one BMP code point.
///
/// Full characters live in the 32768-point range starting at U+3500; a
/// trailing remainder of 7 bits or fewer is carried by one character from
/// the 128-point range starting at U+1500. Both ranges sit below the
/// surrogate area, so every character is exactly one UTF-16 code unit.
/// Unused low-order bits in the final character are padded with ones.
mod base32768 {
    use crate::error::NameError;

    const FULL_BITS: u32 = 15;
    const TAIL_BITS: u32 = 7;
    const FULL_BASE: u32 = 0x3500;
    const TAIL_BASE: u32 = 0x1500;

    /// Both repertoires sit entirely below the surrogate range, so these
    /// conversions can never produce an invalid scalar value.
    fn full_char(value: u32) -> char {
        char::from_u32(FULL_BASE + (value & 0x7FFF)).expect("repertoire is below the surrogates")
    }

    fn tail_char(value: u32) -> char {
        char::from_u32(TAIL_BASE + (value & 0x7F)).expect("repertoire is below the surrogates")
    }

    pub(super) fn encode(data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len() * 8 / FULL_BITS as usize + 1);
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;

        for &byte in data {
            acc = (acc << 8) | byte as u32;
            bits += 8;
            if bits >= FULL_BITS {
                bits -= FULL_BITS;
                let value = (acc >> bits) & 0x7FFF;
                out.push(full_char(value));
                acc &= (1 << bits) - 1;
            }
        }

        if bits > 0 {
            // pad the remainder with one-bits up to the next repertoire size
            if bits <= TAIL_BITS {
                let pad = TAIL_BITS - bits;
                let value = ((acc << pad) | ((1 << pad) - 1)) & 0x7F;
                out.push(tail_char(value));
            } else {
                let pad = FULL_BITS - bits;
                let value = ((acc << pad) | ((1 << pad) - 1)) & 0x7FFF;
                out.push(full_char(value));
            }
        }
        out
    }

    pub(super) fn decode(encoded: &str) -> Result<Vec<u8>, NameError> {
        let mut out = Vec::with_capacity(encoded.len() * 2);
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;

        let mut chars = encoded.chars().peekable();
        while let Some(ch) = chars.next() {
            let cp = ch as u32;
            let (value, width) = if (FULL_BASE..FULL_BASE + 0x8000).contains(&cp) {
                (cp - FULL_BASE, FULL_BITS)
            } else if (TAIL_BASE..TAIL_BASE + 0x80).contains(&cp) {
                // the 7-bit repertoire is only valid in final position
                if chars.peek().is_some() {
                    return Err(NameError::BadEncoding);
                }
                (cp - TAIL_BASE, TAIL_BITS)
            } else {
                return Err(NameError::BadEncoding);
            };

            acc = (acc << width) | value;
            bits += width;
            while bits >= 8 {
                bits -= 8;
                out.push((acc >> bits) as u8);
                acc &= (1 << bits) - 1;
            }
        }

        // leftover bits are padding and must be all ones
        if bits > 0 && acc != (1 << bits) - 1 {
            return Err(NameError::BadEncoding);
        }
        Ok(out)
    }
}
