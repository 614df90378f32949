pub mod config;
pub mod error;

pub use config::VeilConfig;
pub use error::{VeilError, VeilResult};
