use thiserror::Error;

pub type VeilResult<T> = Result<T, VeilError>;

#[derive(Debug, Error)]
pub enum VeilError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0} is not supported by the underlying store")]
    FeatureUnavailable(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
