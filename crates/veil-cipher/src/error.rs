use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KdfError {
    #[error("password must not be empty")]
    EmptyPassword,

    #[error("invalid key derivation parameters")]
    BadParams,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("invalid name encoding")]
    BadEncoding,

    #[error("name ciphertext failed authentication")]
    BadCiphertext,

    #[error("encrypted name is missing the required suffix")]
    MissingSuffix,

    #[error("name segment too long to encrypt")]
    TooLong,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("file header is invalid or too short")]
    BadHeader,

    #[error("block failed authentication")]
    BadBlock,

    #[error("file is truncated")]
    Truncated,

    #[error("nonce counter overflowed")]
    NonceOverflow,

    #[error("failed to unwrap content encryption key")]
    CekUnwrapFailed,

    #[error("position is beyond the end of the file")]
    OutOfRange,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("ciphertext length {0} is not valid for this cipher version")]
    BadCiphertextLength(u64),
}
