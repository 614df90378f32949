//! Streaming decrypter: header parse, CEK unwrap, block validation, seek.
//!
//! Every block must open under its counter nonce. The final block only
//! opens under the flagged nonce, which is how end-of-stream is
//! authenticated: running out of ciphertext without having seen a flagged
//! block means the object was cut short.
//!
//! Seeking never decrypts more than necessary: a plaintext offset maps to
//! a block index and a byte offset within it, the ciphertext is re-read
//! from that block's position, and the leading bytes of the decoded block
//! are discarded.

use bytes::Bytes;

use crate::error::{CryptoError, SizeError};
use crate::nonce::Nonce;
use crate::{
    secretbox, sizes, Cek, Cipher, CipherVersion, BLOCK_CIPHER_SIZE, BLOCK_DATA_SIZE, CEK_SIZE,
    FILE_FOOTER_SIZE_V2, FILE_HEADER_SIZE_V1, FILE_HEADER_SIZE_V2, FILE_MAGIC_V1, FILE_MAGIC_V2,
    HASH_MARKER_NONE, TAG_SIZE,
};

/// Positioned reads over a ciphertext object.
///
/// The store implements this with ranged reads against the remote; a seek
/// is just the next `read_at` starting elsewhere. Reads shorter than `len`
/// only happen at the end of the object.
#[allow(async_fn_in_trait)]
pub trait RangeSource: Send {
    /// Total ciphertext size in bytes.
    async fn size(&mut self) -> std::io::Result<u64>;

    /// Read up to `len` bytes starting at `offset`.
    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Bytes>;
}

/// In-memory source, used by tests and the CEK-based decrypt command.
impl RangeSource for std::io::Cursor<Vec<u8>> {
    async fn size(&mut self) -> std::io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let data = self.get_ref();
        let start = (offset as usize).min(data.len());
        let end = (start + len).min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }
}

/// Result of reading a V2 plaintext-hash footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaintextHash {
    /// Lowercase hex MD5 of the plaintext
    Md5(String),
    /// V1 object, or a V2 footer written without a hash
    Unsupported,
}

pub struct DataDecrypter<S> {
    src: S,
    block_key: [u8; 32],
    version: CipherVersion,
    initial_nonce: Nonce,
    nonce: Nonce,
    cek: Option<Cek>,
    ciphertext_size: u64,
    /// Ciphertext offset where the block stream ends (start of V2 footer)
    body_end: u64,
    /// Ciphertext offset of the next block to read
    next_offset: u64,
    block_index: u64,
    buf: Vec<u8>,
    buf_pos: usize,
    /// Plaintext bytes to drop after the next block decodes (set by seek)
    discard: usize,
    /// A flagged block decoded, or a seek landed exactly on EOF
    finished: bool,
    pass_bad_blocks: bool,
}

impl Cipher {
    /// Parse the header of `src` and build a decrypter.
    ///
    /// The stored version is detected from the magic, so objects written
    /// under either version decrypt regardless of configuration. With
    /// `override_cek` the wrapped CEK is ignored entirely, which is what
    /// lets a disclosed CEK decrypt a V2 object without the master key.
    pub async fn decrypt_data<S: RangeSource>(
        &self,
        mut src: S,
        override_cek: Option<Cek>,
    ) -> Result<DataDecrypter<S>, CryptoError> {
        let ciphertext_size = src.size().await?;
        let header = src.read_at(0, FILE_HEADER_SIZE_V2).await?;
        if header.len() < FILE_HEADER_SIZE_V1 {
            return Err(CryptoError::BadHeader);
        }

        let version = if &header[..8] == FILE_MAGIC_V1 {
            CipherVersion::V1
        } else if &header[..8] == FILE_MAGIC_V2 {
            CipherVersion::V2
        } else {
            return Err(CryptoError::BadHeader);
        };
        let initial_nonce = Nonce::from_slice(&header[8..FILE_HEADER_SIZE_V1]);

        let (block_key, cek, body_end) = match version {
            CipherVersion::V1 => (*self.data_key(), None, ciphertext_size),
            CipherVersion::V2 => {
                if header.len() < FILE_HEADER_SIZE_V2 {
                    return Err(CryptoError::BadHeader);
                }
                let cek = match override_cek {
                    Some(cek) => cek,
                    None => {
                        let wrapped = &header[FILE_HEADER_SIZE_V1..FILE_HEADER_SIZE_V2];
                        let mut wrap_nonce = initial_nonce;
                        wrap_nonce.clear_last_block_flag(CipherVersion::V2);
                        let unwrapped = secretbox::open(self.data_key(), &wrap_nonce, wrapped)
                            .map_err(|_| CryptoError::CekUnwrapFailed)?;
                        let bytes: [u8; CEK_SIZE] = unwrapped
                            .as_slice()
                            .try_into()
                            .map_err(|_| CryptoError::CekUnwrapFailed)?;
                        Cek::from_bytes(bytes)
                    }
                };
                let min_size = (FILE_HEADER_SIZE_V2 + FILE_FOOTER_SIZE_V2) as u64;
                if ciphertext_size < min_size {
                    return Err(CryptoError::Truncated);
                }
                let body_end = ciphertext_size - FILE_FOOTER_SIZE_V2 as u64;
                (*cek.as_bytes(), Some(cek), body_end)
            }
        };

        Ok(DataDecrypter {
            src,
            block_key,
            version,
            initial_nonce,
            nonce: initial_nonce,
            cek,
            ciphertext_size,
            body_end,
            next_offset: version.header_size() as u64,
            block_index: 0,
            buf: Vec::new(),
            buf_pos: 0,
            discard: 0,
            finished: false,
            pass_bad_blocks: self.pass_bad_blocks(),
        })
    }
}

impl<S: RangeSource> DataDecrypter<S> {
    /// Version detected from the object's magic.
    pub fn version(&self) -> CipherVersion {
        self.version
    }

    /// Nonce read from the object's header.
    pub fn initial_nonce(&self) -> &Nonce {
        &self.initial_nonce
    }

    /// The object's content encryption key (V2 only).
    pub fn cek(&self) -> Option<&Cek> {
        self.cek.as_ref()
    }

    /// Decrypted size of the object, from size arithmetic alone.
    pub fn decrypted_size(&self) -> Result<u64, SizeError> {
        sizes::decrypted_size(self.ciphertext_size, self.version)
    }

    /// Read decrypted bytes into `out`, returning 0 at end of file.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize, CryptoError> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.buf_pos < self.buf.len() {
                let n = (self.buf.len() - self.buf_pos).min(out.len());
                out[..n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
                self.buf_pos += n;
                return Ok(n);
            }
            if !self.load_next_block().await? {
                return Ok(0);
            }
        }
    }

    /// Read everything from the current position to end of file.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; BLOCK_DATA_SIZE];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Position the stream at plaintext offset `offset`.
    ///
    /// Translates to a ciphertext offset and a starting nonce; the bytes
    /// of the target block before `offset` are decoded and discarded.
    pub async fn seek(&mut self, offset: u64) -> Result<(), CryptoError> {
        let plaintext_size = self
            .decrypted_size()
            .map_err(|_| CryptoError::BadHeader)?;
        if offset > plaintext_size {
            return Err(CryptoError::OutOfRange);
        }

        self.buf.clear();
        self.buf_pos = 0;

        if offset == plaintext_size {
            // positioned exactly at EOF: nothing left to validate or read
            self.finished = true;
            self.discard = 0;
            return Ok(());
        }

        let block_index = offset / BLOCK_DATA_SIZE as u64;
        let mut nonce = self.initial_nonce;
        if nonce.add(block_index) {
            return Err(CryptoError::NonceOverflow);
        }

        self.nonce = nonce;
        self.block_index = block_index;
        self.next_offset = self.version.header_size() as u64 + block_index * BLOCK_CIPHER_SIZE as u64;
        self.discard = (offset % BLOCK_DATA_SIZE as u64) as usize;
        self.finished = false;
        Ok(())
    }

    /// Fetch, authenticate and buffer the next block.
    /// Returns false at end of stream.
    async fn load_next_block(&mut self) -> Result<bool, CryptoError> {
        if self.finished {
            return Ok(false);
        }
        let remaining = self.body_end.saturating_sub(self.next_offset);
        if remaining == 0 {
            if self.block_index == 0 {
                // zero-length object: no blocks at all
                self.finished = true;
                return Ok(false);
            }
            // block stream ran out without a flagged final block
            return Err(CryptoError::Truncated);
        }
        if remaining <= TAG_SIZE as u64 {
            return Err(CryptoError::Truncated);
        }

        let want = remaining.min(BLOCK_CIPHER_SIZE as u64) as usize;
        let chunk = self.src.read_at(self.next_offset, want).await?;
        if chunk.len() < want {
            return Err(CryptoError::Truncated);
        }
        let final_span = remaining <= BLOCK_CIPHER_SIZE as u64;

        let plaintext = match secretbox::open(&self.block_key, &self.nonce, &chunk) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                let flagged = self.nonce.with_last_block_flag(self.version);
                match secretbox::open(&self.block_key, &flagged, &chunk) {
                    Ok(plaintext) => {
                        if !final_span {
                            // a flagged block with ciphertext still after it
                            return Err(CryptoError::BadBlock);
                        }
                        self.finished = true;
                        plaintext
                    }
                    Err(_) if self.pass_bad_blocks => {
                        tracing::warn!(
                            block = self.block_index,
                            "substituting zeros for undecryptable block"
                        );
                        if final_span {
                            self.finished = true;
                        }
                        vec![0u8; chunk.len() - TAG_SIZE]
                    }
                    Err(_) => return Err(CryptoError::BadBlock),
                }
            }
        };

        self.block_index += 1;
        if self.nonce.increment() {
            return Err(CryptoError::NonceOverflow);
        }
        self.next_offset += chunk.len() as u64;

        let skip = self.discard.min(plaintext.len());
        self.discard -= skip;
        self.buf = plaintext;
        self.buf_pos = skip;
        Ok(true)
    }

    /// Read and open the V2 plaintext-hash footer.
    ///
    /// The footer nonce is derived, never stored: `start nonce + total
    /// blocks`, with the last-block flag set.
    pub async fn read_hash(&mut self) -> Result<PlaintextHash, CryptoError> {
        if self.version == CipherVersion::V1 {
            return Ok(PlaintextHash::Unsupported);
        }

        let footer_offset = self.ciphertext_size - FILE_FOOTER_SIZE_V2 as u64;
        let footer = self
            .src
            .read_at(footer_offset, FILE_FOOTER_SIZE_V2)
            .await?;
        if footer.len() < FILE_FOOTER_SIZE_V2 {
            return Err(CryptoError::Truncated);
        }
        if footer[0] == HASH_MARKER_NONE {
            return Ok(PlaintextHash::Unsupported);
        }

        let plaintext_size = self
            .decrypted_size()
            .map_err(|_| CryptoError::BadHeader)?;
        let total_blocks = plaintext_size.div_ceil(BLOCK_DATA_SIZE as u64);
        let mut footer_nonce = self.initial_nonce;
        if footer_nonce.add(total_blocks) {
            return Err(CryptoError::NonceOverflow);
        }
        footer_nonce.set_last_block_flag(self.version);

        match secretbox::open(&self.block_key, &footer_nonce, &footer[1..]) {
            Ok(digest) => Ok(PlaintextHash::Md5(
                data_encoding::HEXLOWER.encode(&digest),
            )),
            Err(_) if self.pass_bad_blocks => {
                tracing::warn!("ignoring undecryptable hash footer");
                Ok(PlaintextHash::Unsupported)
            }
            Err(_) => Err(CryptoError::BadBlock),
        }
    }
}
