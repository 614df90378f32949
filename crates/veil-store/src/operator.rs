//! OpenDAL Operator factory for the underlying store

use anyhow::{Context, Result};
use opendal::Operator;

use veil_core::config::RemoteConfig;

/// Build an OpenDAL operator for the configured backend.
///
/// Supports S3-compatible endpoints (path-style addressing, as required by
/// MinIO and friends), a local filesystem root, and the in-memory backend
/// used by tests.
pub fn build_operator(cfg: &RemoteConfig) -> Result<Operator> {
    let op = match cfg.service.as_str() {
        "s3" => {
            let builder = opendal::services::S3::default()
                .endpoint(&cfg.endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket)
                .root(&cfg.root)
                .access_key_id(&cfg.access_key_id)
                .secret_access_key(&cfg.secret_access_key);
            Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .finish()
        }
        "fs" => {
            let root = if cfg.root.is_empty() {
                cfg.bucket.clone()
            } else {
                format!("{}/{}", cfg.bucket, cfg.root)
            };
            let builder = opendal::services::Fs::default().root(&root);
            Operator::new(builder)
                .context("creating OpenDAL fs operator")?
                .finish()
        }
        "memory" => {
            let builder = opendal::services::Memory::default();
            Operator::new(builder)
                .context("creating OpenDAL memory operator")?
                .finish()
        }
        other => anyhow::bail!("unknown remote service {other:?} (expected s3, fs or memory)"),
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        ))
}
