//! veil-store: encrypted remote over an OpenDAL operator
//!
//! Wraps any OpenDAL-backed object store with the veil-cipher transforms:
//! listings decrypt names on the way out, puts encrypt names and contents
//! on the way in, and ranged reads map plaintext offsets onto ciphertext
//! ranges so seeks never download more than they need.

pub mod commands;
pub mod operator;
pub mod remote;
pub mod source;

pub use commands::CommandError;
pub use operator::build_operator;
pub use remote::{build_cipher, Entry, Features, ObjectInfo, ObjectReader, PutResult, VeilRemote};
pub use source::ObjectSource;
