//! Streaming encrypter: header, CEK wrap, sealed block stream, hash footer.
//!
//! Pull-based: ciphertext is produced one segment at a time as the
//! consumer asks for it, so at most one plaintext block (plus one byte of
//! lookahead) and one ciphertext block are ever buffered. The lookahead
//! byte is how the encrypter knows the block it just read is the final
//! one and must be sealed under the flagged nonce.
//!
//! For V2 an MD5 tap accumulates the plaintext as it is consumed; once
//! the block stream ends the digest is sealed under `nonce + total
//! blocks` with the last-block flag set and emitted as the footer.

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CryptoError;
use crate::nonce::Nonce;
use crate::{
    secretbox, Cek, Cipher, CipherVersion, BLOCK_DATA_SIZE, FILE_MAGIC_V1, FILE_MAGIC_V2,
    HASH_MARKER_MD5,
};

enum State {
    Header,
    Blocks,
    Footer,
    Done,
}

pub struct DataEncrypter<R> {
    inner: R,
    block_key: [u8; 32],
    version: CipherVersion,
    initial_nonce: Nonce,
    nonce: Nonce,
    cek: Option<Cek>,
    header: Vec<u8>,
    hasher: Option<Md5>,
    lookahead: Option<u8>,
    state: State,
}

impl Cipher {
    /// Build an encrypter over `reader`.
    ///
    /// A fresh random nonce (and, for V2, CEK) is generated unless the
    /// caller supplies one; callers do so only to re-encrypt an existing
    /// object's contents for hash comparison.
    pub fn encrypt_data<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        nonce: Option<Nonce>,
        cek: Option<Cek>,
    ) -> DataEncrypter<R> {
        let initial_nonce = nonce.unwrap_or_else(|| Nonce::random(self.version));

        let (block_key, cek, header, hasher) = match self.version {
            CipherVersion::V1 => {
                debug_assert!(cek.is_none(), "V1 containers have no CEK");
                let mut header = Vec::with_capacity(crate::FILE_HEADER_SIZE_V1);
                header.extend_from_slice(FILE_MAGIC_V1);
                header.extend_from_slice(initial_nonce.as_bytes());
                (*self.data_key(), None, header, None)
            }
            CipherVersion::V2 => {
                let cek = cek.unwrap_or_else(Cek::random);

                // the CEK is wrapped under the start nonce with the flag
                // bit explicitly cleared; block 0 uses the unflagged nonce
                // too, but the wrap must stay stable even if a caller hands
                // us a nonce read back from an existing object
                let mut wrap_nonce = initial_nonce;
                wrap_nonce.clear_last_block_flag(CipherVersion::V2);
                let wrapped = secretbox::seal(self.data_key(), &wrap_nonce, cek.as_bytes());

                let mut header = Vec::with_capacity(crate::FILE_HEADER_SIZE_V2);
                header.extend_from_slice(FILE_MAGIC_V2);
                header.extend_from_slice(initial_nonce.as_bytes());
                header.extend_from_slice(&wrapped);
                (*cek.as_bytes(), Some(cek), header, Some(Md5::new()))
            }
        };

        DataEncrypter {
            inner: reader,
            block_key,
            version: self.version,
            initial_nonce,
            nonce: initial_nonce,
            cek,
            header,
            hasher,
            lookahead: None,
            state: State::Header,
        }
    }
}

impl<R: AsyncRead + Unpin> DataEncrypter<R> {
    /// The nonce written into this object's header.
    pub fn initial_nonce(&self) -> &Nonce {
        &self.initial_nonce
    }

    /// The content encryption key (V2 only).
    pub fn cek(&self) -> Option<&Cek> {
        self.cek.as_ref()
    }

    /// Produce the next ciphertext segment, or `None` at end of stream.
    ///
    /// Segments arrive in container order: the header, one sealed block
    /// per call, then the footer for V2.
    pub async fn next_segment(&mut self) -> Result<Option<Vec<u8>>, CryptoError> {
        loop {
            match self.state {
                State::Header => {
                    self.state = State::Blocks;
                    return Ok(Some(std::mem::take(&mut self.header)));
                }
                State::Blocks => {
                    let (block, last) = self.fill_block().await?;
                    if last {
                        self.state = State::Footer;
                    }
                    if block.is_empty() {
                        // zero-length plaintext produces no blocks at all
                        continue;
                    }
                    if let Some(hasher) = &mut self.hasher {
                        hasher.update(&block);
                    }
                    let seal_nonce = if last {
                        self.nonce.with_last_block_flag(self.version)
                    } else {
                        self.nonce
                    };
                    let sealed = secretbox::seal(&self.block_key, &seal_nonce, &block);
                    if self.nonce.increment() {
                        return Err(CryptoError::NonceOverflow);
                    }
                    return Ok(Some(sealed));
                }
                State::Footer => {
                    self.state = State::Done;
                    let Some(hasher) = self.hasher.take() else {
                        return Ok(None); // V1 has no footer
                    };
                    // after the last increment the counter sits at
                    // start + total blocks, exactly the footer nonce
                    let footer_nonce = self.nonce.with_last_block_flag(self.version);
                    let digest = hasher.finalize();
                    let sealed = secretbox::seal(&self.block_key, &footer_nonce, &digest);

                    let mut footer = Vec::with_capacity(1 + sealed.len());
                    footer.push(HASH_MARKER_MD5);
                    footer.extend_from_slice(&sealed);
                    return Ok(Some(footer));
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// Read up to one block of plaintext plus one byte of lookahead.
    /// Returns the block and whether it is the final one.
    async fn fill_block(&mut self) -> Result<(Vec<u8>, bool), CryptoError> {
        let mut buf = Vec::with_capacity(BLOCK_DATA_SIZE + 1);
        if let Some(byte) = self.lookahead.take() {
            buf.push(byte);
        }

        let mut chunk = [0u8; 8 * 1024];
        while buf.len() <= BLOCK_DATA_SIZE {
            let want = (BLOCK_DATA_SIZE + 1 - buf.len()).min(chunk.len());
            let n = self.inner.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Ok((buf, true));
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        // a byte beyond the block boundary: this block is not the last
        self.lookahead = buf.pop();
        Ok((buf, false))
    }

    /// Drive the encrypter to completion, writing every segment to `out`.
    /// Returns the total number of ciphertext bytes written.
    pub async fn pipe_to<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> Result<u64, CryptoError> {
        let mut written = 0u64;
        while let Some(segment) = self.next_segment().await? {
            out.write_all(&segment).await?;
            written += segment.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sizes, MasterKeys, NameConfig};
    use std::io::Cursor;

    fn cipher(version: CipherVersion) -> Cipher {
        let keys = MasterKeys::from_bytes([1u8; 32], [2u8; 32], [3u8; 16]);
        Cipher::from_keys(keys, NameConfig::default(), version)
    }

    async fn encrypt_to_vec(cipher: &Cipher, plaintext: &[u8]) -> Vec<u8> {
        let mut enc = cipher.encrypt_data(Cursor::new(plaintext.to_vec()), None, None);
        let mut out = Vec::new();
        enc.pipe_to(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_ciphertext_sizes_match_arithmetic() {
        for version in [CipherVersion::V1, CipherVersion::V2] {
            let c = cipher(version);
            for len in [0usize, 1, 100, BLOCK_DATA_SIZE, BLOCK_DATA_SIZE + 1] {
                let ciphertext = encrypt_to_vec(&c, &vec![0xAA; len]).await;
                assert_eq!(
                    ciphertext.len() as u64,
                    sizes::encrypted_size(len as u64, version),
                    "{version:?} len {len}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_empty_v1_is_header_only() {
        let c = cipher(CipherVersion::V1);
        let ciphertext = encrypt_to_vec(&c, b"").await;
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(&ciphertext[..8], FILE_MAGIC_V1);
    }

    #[tokio::test]
    async fn test_v2_header_layout() {
        let c = cipher(CipherVersion::V2);
        let ciphertext = encrypt_to_vec(&c, b"hi").await;

        assert_eq!(&ciphertext[..8], FILE_MAGIC_V2);
        // reserved nonce byte is written as zero
        assert_eq!(ciphertext[31], 0);
    }

    #[tokio::test]
    async fn test_fresh_nonce_and_cek_per_encrypter() {
        let c = cipher(CipherVersion::V2);
        let a = c.encrypt_data(Cursor::new(vec![0u8; 4]), None, None);
        let b = c.encrypt_data(Cursor::new(vec![0u8; 4]), None, None);

        assert_ne!(a.initial_nonce().as_bytes(), b.initial_nonce().as_bytes());
        assert_ne!(a.cek().unwrap().as_bytes(), b.cek().unwrap().as_bytes());
    }

    #[tokio::test]
    async fn test_explicit_nonce_reproduces_ciphertext() {
        let c = cipher(CipherVersion::V2);
        let nonce = Nonce::random(CipherVersion::V2);
        let cek = Cek::random();
        let plaintext = vec![7u8; 100_000];

        let mut out1 = Vec::new();
        c.encrypt_data(Cursor::new(plaintext.clone()), Some(nonce), Some(cek.clone()))
            .pipe_to(&mut out1)
            .await
            .unwrap();
        let mut out2 = Vec::new();
        c.encrypt_data(Cursor::new(plaintext), Some(nonce), Some(cek))
            .pipe_to(&mut out2)
            .await
            .unwrap();

        assert_eq!(out1, out2);
    }
}
