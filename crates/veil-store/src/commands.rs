//! Backend commands: name mapping, CEK disclosure and CEK-based decryption.
//!
//! `show-cek` and `decrypt` together support handing a single object to
//! someone without handing them the master key: the owner discloses the
//! object's CEK, the recipient decrypts with it and an otherwise
//! unrelated configuration.

use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use veil_cipher::{Cek, CipherVersion, CEK_SIZE};

use crate::remote::VeilRemote;
use crate::source::ObjectSource;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}: V1 objects carry no content encryption key")]
    NoCekInV1(String),
}

impl VeilRemote {
    /// Encrypt each name, in order. Pure.
    pub fn cmd_encode(&self, names: &[String]) -> Result<Vec<String>> {
        names
            .iter()
            .map(|name| self.encrypt_name(name))
            .collect()
    }

    /// Decrypt each name, in order. Fails on the first undecryptable one.
    pub fn cmd_decode(&self, names: &[String]) -> Result<Vec<String>> {
        names
            .iter()
            .map(|name| {
                self.decrypt_name(name)
                    .with_context(|| format!("failed to decrypt {name:?}"))
            })
            .collect()
    }

    /// For each logical name, read the object's header and unwrap its CEK
    /// under the master key. Returns lowercase hex keys.
    pub async fn cmd_show_cek(&self, names: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let encrypted_path = self.encrypt_name(name)?;
            let source = ObjectSource::open(self.underlying(), &encrypted_path)
                .await
                .with_context(|| format!("opening {name:?}"))?;
            let decrypter = self.cipher().decrypt_data(source, None).await?;
            match decrypter.cek() {
                Some(cek) => out.push(data_encoding::HEXLOWER.encode(cek.as_bytes())),
                None => return Err(CommandError::NoCekInV1(name.clone()).into()),
            }
        }
        Ok(out)
    }

    /// Decrypt the object at `encrypted_path` with a disclosed CEK and
    /// write the plaintext to `local_path`. Only V2 objects qualify.
    pub async fn cmd_decrypt(
        &self,
        encrypted_path: &str,
        cek_hex: &str,
        local_path: &Path,
    ) -> Result<()> {
        let raw = data_encoding::HEXLOWER_PERMISSIVE
            .decode(cek_hex.as_bytes())
            .context("CEK is not valid hex")?;
        let bytes: [u8; CEK_SIZE] = raw
            .try_into()
            .map_err(|_| anyhow::anyhow!("CEK must be {CEK_SIZE} bytes"))?;
        let cek = Cek::from_bytes(bytes);

        let mut reader = self
            .open_encrypted(encrypted_path, 0, None, Some(cek))
            .await?;
        if reader.version() == Some(CipherVersion::V1) {
            return Err(CommandError::NoCekInV1(encrypted_path.to_string()).into());
        }

        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::File::create(local_path)
            .await
            .with_context(|| format!("creating {}", local_path.display()))?;

        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;

        info!(
            encrypted_path,
            local = %local_path.display(),
            bytes = total,
            "decrypted with disclosed CEK"
        );
        Ok(())
    }
}
