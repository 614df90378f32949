//! Encrypted remote: the pass-through object store.
//!
//! `VeilRemote` owns an OpenDAL operator plus one immutable `Cipher`
//! shared by every stream. Listings decrypt names on the way out and by
//! default skip anything undecryptable (mixed content must not poison the
//! view); `strict_names` turns those skips into hard errors. Uploads hash
//! the ciphertext in flight and compare against what the store reports,
//! deleting the object on mismatch rather than leaving a corrupt copy
//! behind.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use md5::{Digest, Md5};
use opendal::Operator;
use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use veil_cipher::{
    sizes, Cek, Cipher, CipherVersion, CryptoError, DataDecrypter, NameConfig, Nonce,
    PlaintextHash, RangeSource, FILE_MAGIC_V1, FILE_MAGIC_V2,
};
use veil_core::config::CryptConfig;
use veil_core::VeilError;

use crate::source::ObjectSource;

/// Optional operations of the underlying store, probed once at
/// construction from the operator's capability set.
#[derive(Debug, Clone, Copy)]
pub struct Features {
    pub copy: bool,
    pub rename: bool,
    pub presign: bool,
}

/// A decrypted listing entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub is_dir: bool,
    /// Decrypted size; `None` for directories or undecodable lengths
    pub size: Option<u64>,
}

/// Decrypted object metadata.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path: String,
    pub encrypted_path: String,
    pub size: u64,
    pub encrypted_size: u64,
}

/// Result of an upload.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub encrypted_path: String,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
}

/// Build a cipher from the `[crypt]` config section.
pub fn build_cipher(cfg: &CryptConfig) -> Result<Cipher> {
    let mode = cfg
        .filename_encryption
        .parse()
        .map_err(VeilError::Config)?;
    let encoding = cfg.filename_encoding.parse().map_err(VeilError::Config)?;
    let version = cfg.cipher_version.parse().map_err(VeilError::Config)?;
    let suffix = if cfg.suffix == "none" {
        String::new()
    } else {
        cfg.suffix.clone()
    };

    let names = NameConfig {
        mode,
        encoding,
        encrypt_dir_names: cfg.directory_name_encryption,
        suffix,
    };
    let password = SecretString::from(cfg.password.clone());
    let salt = (!cfg.password2.is_empty()).then(|| SecretString::from(cfg.password2.clone()));

    let cipher = Cipher::new(&password, salt.as_ref(), names, version)
        .context("deriving master keys from passphrase")?;
    Ok(cipher.with_pass_bad_blocks(cfg.pass_bad_blocks))
}

pub struct VeilRemote {
    op: Operator,
    cipher: Arc<Cipher>,
    no_data_encryption: bool,
    strict_names: bool,
    exact_size: bool,
    features: Features,
}

impl VeilRemote {
    /// Wrap `op` with the given cipher. This is the only way to get a
    /// remote: hosts construct it explicitly, nothing registers itself.
    pub fn new(op: Operator, cipher: Cipher, cfg: &CryptConfig) -> Self {
        let cap = op.info().full_capability();
        let features = Features {
            copy: cap.copy,
            rename: cap.rename,
            presign: cap.presign,
        };
        Self {
            op,
            cipher: Arc::new(cipher),
            no_data_encryption: cfg.no_data_encryption,
            strict_names: cfg.strict_names,
            exact_size: cfg.exact_size,
            features,
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Direct access to the wrapped operator.
    pub fn underlying(&self) -> &Operator {
        &self.op
    }

    pub fn encrypt_name(&self, path: &str) -> Result<String> {
        Ok(self.cipher.encrypt_file_name(path)?)
    }

    pub fn decrypt_name(&self, encrypted: &str) -> Result<String> {
        Ok(self.cipher.decrypt_file_name(encrypted)?)
    }

    /// List `dir`, decrypting entry names.
    pub async fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        let encrypted_dir = self.cipher.encrypt_dir_name(dir)?;
        let list_path = if encrypted_dir.is_empty() {
            "/".to_string()
        } else {
            format!("{encrypted_dir}/")
        };

        let entries = self
            .op
            .list(&list_path)
            .await
            .with_context(|| format!("listing {dir:?} on the underlying store"))?;

        let mut out = Vec::with_capacity(entries.len());
        let mut undecryptable = 0usize;
        let mut first_error = None;

        for entry in entries {
            let raw = entry.path().trim_start_matches('/');
            let is_dir = entry.metadata().is_dir();
            let raw = if is_dir {
                raw.trim_end_matches('/')
            } else {
                raw
            };
            if raw.is_empty() || raw == encrypted_dir {
                continue; // the listed directory itself
            }

            let decrypted = if is_dir {
                self.cipher.decrypt_dir_name(raw)
            } else {
                self.cipher.decrypt_file_name(raw)
            };
            match decrypted {
                Ok(path) => {
                    let size = if is_dir {
                        None
                    } else {
                        self.decrypted_size_of(raw, entry.metadata().content_length())
                            .await
                    };
                    out.push(Entry { path, is_dir, size });
                }
                Err(err) => {
                    if self.strict_names {
                        undecryptable += 1;
                        first_error.get_or_insert_with(|| format!("{raw}: {err}"));
                    } else {
                        warn!(name = raw, %err, "skipping undecryptable name");
                    }
                }
            }
        }

        if undecryptable > 0 {
            bail!(
                "{undecryptable} undecryptable name(s) in listing, first: {}",
                first_error.unwrap_or_default()
            );
        }
        Ok(out)
    }

    /// Decrypted size of an object from its ciphertext length, reading the
    /// header first when `exact_size` asks for per-object detection.
    async fn decrypted_size_of(&self, encrypted_path: &str, encrypted_size: u64) -> Option<u64> {
        if self.no_data_encryption {
            return Some(encrypted_size);
        }
        let version = if self.exact_size {
            match self.stored_version(encrypted_path).await {
                Ok(version) => version,
                Err(err) => {
                    debug!(name = encrypted_path, %err, "could not detect stored version");
                    return None;
                }
            }
        } else {
            self.cipher.version()
        };
        match sizes::decrypted_size(encrypted_size, version) {
            Ok(size) => Some(size),
            Err(err) => {
                debug!(name = encrypted_path, %err, "bad size for decrypt");
                None
            }
        }
    }

    /// Read an object's magic to learn which version actually wrote it.
    async fn stored_version(&self, encrypted_path: &str) -> Result<CipherVersion> {
        let header = self
            .op
            .read_with(encrypted_path)
            .range(0..veil_cipher::FILE_HEADER_SIZE_V2 as u64)
            .await
            .context("reading object header")?
            .to_bytes();
        if header.len() >= 8 && &header[..8] == FILE_MAGIC_V1 {
            Ok(CipherVersion::V1)
        } else if header.len() >= 8 && &header[..8] == FILE_MAGIC_V2 {
            Ok(CipherVersion::V2)
        } else {
            bail!("object carries no known magic");
        }
    }

    /// Metadata for a single object.
    pub async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let encrypted_path = self.cipher.encrypt_file_name(path)?;
        let meta = self
            .op
            .stat(&encrypted_path)
            .await
            .with_context(|| format!("stat {path:?}"))?;
        let encrypted_size = meta.content_length();
        let size = self
            .decrypted_size_of(&encrypted_path, encrypted_size)
            .await
            .unwrap_or(encrypted_size);
        Ok(ObjectInfo {
            path: path.to_string(),
            encrypted_path,
            size,
            encrypted_size,
        })
    }

    /// Encrypt and upload `reader` as `path`.
    ///
    /// The ciphertext is MD5-hashed in flight; if the store reports a
    /// content hash for the stored object and it disagrees, the object is
    /// deleted (best effort) and the upload fails.
    pub async fn put<R: AsyncRead + Unpin + Send>(
        &self,
        path: &str,
        reader: R,
    ) -> Result<PutResult> {
        let encrypted_path = self.cipher.encrypt_file_name(path)?;

        if self.no_data_encryption {
            return self.put_plain(&encrypted_path, reader).await;
        }

        let mut encrypter = self.cipher.encrypt_data(reader, None, None);
        let mut writer = self
            .op
            .writer(&encrypted_path)
            .await
            .with_context(|| format!("opening writer for {path:?}"))?;

        let mut hasher = Md5::new();
        let mut ciphertext_bytes = 0u64;
        let result = async {
            while let Some(segment) = encrypter.next_segment().await? {
                hasher.update(&segment);
                ciphertext_bytes += segment.len() as u64;
                writer
                    .write(segment)
                    .await
                    .map_err(|e| CryptoError::Io(std::io::Error::other(e)))?;
            }
            Ok::<(), CryptoError>(())
        }
        .await;

        if let Err(err) = result {
            let _ = writer.abort().await;
            return Err(err).with_context(|| format!("encrypting {path:?}"));
        }
        writer
            .close()
            .await
            .with_context(|| format!("finishing upload of {path:?}"))?;

        let ciphertext_md5 = data_encoding::HEXLOWER.encode(&hasher.finalize());
        self.verify_upload(&encrypted_path, &ciphertext_md5).await?;

        let version = self.cipher.version();
        let plaintext_bytes = sizes::decrypted_size(ciphertext_bytes, version)
            .expect("encrypter output length is always valid");
        debug!(
            path,
            bytes = plaintext_bytes,
            version = version.as_str(),
            "uploaded"
        );

        Ok(PutResult {
            encrypted_path,
            plaintext_bytes,
            ciphertext_bytes,
        })
    }

    async fn put_plain<R: AsyncRead + Unpin + Send>(
        &self,
        encrypted_path: &str,
        mut reader: R,
    ) -> Result<PutResult> {
        let mut writer = self.op.writer(encrypted_path).await?;
        let mut total = 0u64;
        let mut buf = vec![0u8; 256 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            writer.write(buf[..n].to_vec()).await?;
        }
        writer.close().await?;
        Ok(PutResult {
            encrypted_path: encrypted_path.to_string(),
            plaintext_bytes: total,
            ciphertext_bytes: total,
        })
    }

    /// Compare our ciphertext hash with whatever the store reports.
    async fn verify_upload(&self, encrypted_path: &str, ciphertext_md5: &str) -> Result<()> {
        let meta = match self.op.stat(encrypted_path).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!(name = encrypted_path, %err, "skipping upload verification");
                return Ok(());
            }
        };
        let Some(stored) = stored_md5_hex(&meta) else {
            return Ok(());
        };
        if stored != ciphertext_md5 {
            warn!(
                name = encrypted_path,
                expected = ciphertext_md5,
                stored,
                "hash mismatch after upload, removing object"
            );
            if let Err(err) = self.op.delete(encrypted_path).await {
                warn!(name = encrypted_path, %err, "failed to remove corrupted object");
            }
            bail!("corrupted on transfer: md5 differ {ciphertext_md5:?} vs {stored:?}");
        }
        Ok(())
    }

    /// Open `path` for plaintext reads starting at `offset`, at most
    /// `limit` bytes. `override_cek` bypasses the wrapped CEK.
    pub async fn open(
        &self,
        path: &str,
        offset: u64,
        limit: Option<u64>,
        override_cek: Option<Cek>,
    ) -> Result<ObjectReader> {
        let encrypted_path = self.cipher.encrypt_file_name(path)?;
        self.open_encrypted(&encrypted_path, offset, limit, override_cek)
            .await
    }

    /// Like [`open`](Self::open) but takes the already-encrypted name, for
    /// workflows that received an encrypted path from elsewhere.
    pub async fn open_encrypted(
        &self,
        encrypted_path: &str,
        offset: u64,
        limit: Option<u64>,
        override_cek: Option<Cek>,
    ) -> Result<ObjectReader> {
        let source = ObjectSource::open(&self.op, encrypted_path)
            .await
            .with_context(|| format!("opening {encrypted_path:?}"))?;

        let inner = if self.no_data_encryption {
            ReaderInner::Plain {
                source,
                offset,
            }
        } else {
            let mut decrypter = self.cipher.decrypt_data(source, override_cek).await?;
            if decrypter.initial_nonce().is_zero() {
                warn!(name = encrypted_path, "empty nonce read");
            }
            if offset > 0 {
                decrypter.seek(offset).await?;
            }
            ReaderInner::Crypt(Box::new(decrypter))
        };
        Ok(ObjectReader {
            inner,
            remaining: limit,
        })
    }

    /// Plaintext MD5 recorded in a V2 object's footer, `None` when the
    /// object can't carry one (V1, or data encryption is off).
    pub async fn hash(&self, path: &str) -> Result<Option<String>> {
        if self.no_data_encryption {
            return Ok(None);
        }
        let encrypted_path = self.cipher.encrypt_file_name(path)?;
        let source = ObjectSource::open(&self.op, &encrypted_path).await?;
        let mut decrypter = self.cipher.decrypt_data(source, None).await?;
        match decrypter.read_hash().await? {
            PlaintextHash::Md5(hex) => Ok(Some(hex)),
            PlaintextHash::Unsupported => Ok(None),
        }
    }

    /// Encrypt `source` under the nonce (and CEK) of the stored object at
    /// `path` and return the MD5 of the resulting ciphertext. Matching the
    /// store's reported hash proves `source` and the object hold the same
    /// plaintext without decrypting anything.
    pub async fn compute_hash_with_nonce<R: AsyncRead + Unpin + Send>(
        &self,
        path: &str,
        source: R,
    ) -> Result<String> {
        let encrypted_path = self.cipher.encrypt_file_name(path)?;
        let obj = ObjectSource::open(&self.op, &encrypted_path).await?;
        let decrypter = self.cipher.decrypt_data(obj, None).await?;
        if decrypter.version() != self.cipher.version() {
            bail!(
                "object {path:?} was written as {}, configuration says {}; \
                 re-encryption for hash comparison would not match",
                decrypter.version().as_str(),
                self.cipher.version().as_str()
            );
        }
        if decrypter.initial_nonce().is_zero() {
            warn!(name = encrypted_path, "empty nonce read");
        }
        let nonce: Nonce = *decrypter.initial_nonce();
        let cek = decrypter.cek().cloned();

        let mut encrypter = self.cipher.encrypt_data(source, Some(nonce), cek);
        let mut hasher = Md5::new();
        while let Some(segment) = encrypter.next_segment().await? {
            hasher.update(&segment);
        }
        Ok(data_encoding::HEXLOWER.encode(&hasher.finalize()))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let encrypted_path = self.cipher.encrypt_file_name(path)?;
        self.op
            .delete(&encrypted_path)
            .await
            .with_context(|| format!("deleting {path:?}"))
    }

    pub async fn mkdir(&self, dir: &str) -> Result<()> {
        let encrypted_dir = self.cipher.encrypt_dir_name(dir)?;
        self.op
            .create_dir(&format!("{encrypted_dir}/"))
            .await
            .with_context(|| format!("creating directory {dir:?}"))
    }

    /// Remove a directory; fails on most backends if it isn't empty.
    pub async fn rmdir(&self, dir: &str) -> Result<()> {
        let encrypted_dir = self.cipher.encrypt_dir_name(dir)?;
        self.op
            .delete(&format!("{encrypted_dir}/"))
            .await
            .with_context(|| format!("removing directory {dir:?}"))
    }

    /// Remove a directory and everything under it.
    pub async fn purge(&self, dir: &str) -> Result<()> {
        let encrypted_dir = self.cipher.encrypt_dir_name(dir)?;
        self.op
            .remove_all(&format!("{encrypted_dir}/"))
            .await
            .with_context(|| format!("purging {dir:?}"))
    }

    /// Server-side copy, when the store supports it.
    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        if !self.features.copy {
            return Err(VeilError::FeatureUnavailable("copy").into());
        }
        let from_enc = self.cipher.encrypt_file_name(from)?;
        let to_enc = self.cipher.encrypt_file_name(to)?;
        self.op
            .copy(&from_enc, &to_enc)
            .await
            .with_context(|| format!("copying {from:?} to {to:?}"))
    }

    /// Server-side move, when the store supports it.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        if !self.features.rename {
            return Err(VeilError::FeatureUnavailable("rename").into());
        }
        let from_enc = self.cipher.encrypt_file_name(from)?;
        let to_enc = self.cipher.encrypt_file_name(to)?;
        self.op
            .rename(&from_enc, &to_enc)
            .await
            .with_context(|| format!("renaming {from:?} to {to:?}"))
    }
}

/// Extract a hex MD5 from object metadata, via Content-MD5 (base64) or a
/// plain-MD5 etag. Multipart etags aren't MD5s and are ignored.
fn stored_md5_hex(meta: &opendal::Metadata) -> Option<String> {
    if let Some(content_md5) = meta.content_md5() {
        if let Ok(raw) = data_encoding::BASE64.decode(content_md5.as_bytes()) {
            if raw.len() == 16 {
                return Some(data_encoding::HEXLOWER.encode(&raw));
            }
        }
    }
    if let Some(etag) = meta.etag() {
        let trimmed = etag.trim_matches('"');
        if trimmed.len() == 32 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Some(trimmed.to_ascii_lowercase());
        }
    }
    None
}

enum ReaderInner {
    Crypt(Box<DataDecrypter<ObjectSource>>),
    Plain { source: ObjectSource, offset: u64 },
}

/// Plaintext reads over one object, respecting an optional byte limit.
pub struct ObjectReader {
    inner: ReaderInner,
    remaining: Option<u64>,
}

impl ObjectReader {
    /// Stored container version, `None` when contents pass through
    /// unencrypted.
    pub fn version(&self) -> Option<CipherVersion> {
        match &self.inner {
            ReaderInner::Crypt(decrypter) => Some(decrypter.version()),
            ReaderInner::Plain { .. } => None,
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = match self.remaining {
            Some(0) => return Ok(0),
            Some(remaining) => buf.len().min(remaining as usize),
            None => buf.len(),
        };
        let n = match &mut self.inner {
            ReaderInner::Crypt(decrypter) => decrypter.read(&mut buf[..want]).await?,
            ReaderInner::Plain { source, offset } => {
                let chunk = source.read_at(*offset, want).await?;
                buf[..chunk.len()].copy_from_slice(&chunk);
                *offset += chunk.len() as u64;
                chunk.len()
            }
        };
        if let Some(remaining) = &mut self.remaining {
            *remaining -= n as u64;
        }
        Ok(n)
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}
