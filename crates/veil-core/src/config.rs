use serde::{Deserialize, Serialize};

/// Top-level configuration (loaded from veil.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub remote: RemoteConfig,
    pub crypt: CryptConfig,
}

/// The underlying object store to wrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Backend service: "s3", "fs" or "memory"
    pub service: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name (s3) or root directory (fs)
    pub bucket: String,
    /// Prefix inside the bucket under which encrypted objects live
    pub root: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Encryption layer configuration.
///
/// `password` is the primary passphrase, `password2` an optional salt
/// passphrase. Everything else controls how names and contents are
/// transformed on their way to the underlying store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptConfig {
    /// Primary passphrase (required)
    pub password: String,
    /// Salt passphrase (optional but recommended)
    pub password2: String,
    /// Name mode: "standard", "obfuscate" or "off"
    pub filename_encryption: String,
    /// Encrypt directory segments as well as file names
    pub directory_name_encryption: bool,
    /// Textual alphabet for encrypted names: "base32", "base64" or "base32768"
    pub filename_encoding: String,
    /// Trailing suffix on encrypted file names; "none" means empty
    pub suffix: String,
    /// Pass file contents through unmodified (names still per mode)
    pub no_data_encryption: bool,
    /// Substitute zeros for undecryptable blocks instead of erroring
    pub pass_bad_blocks: bool,
    /// Fail listings on undecryptable names instead of skipping them
    pub strict_names: bool,
    /// Container version for newly written objects: "v1" or "v2";
    /// reads always auto-detect
    pub cipher_version: String,
    /// Read each object's header to report its exact decrypted size
    /// (one extra round-trip per stat)
    pub exact_size: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            service: "s3".into(),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "veil".into(),
            root: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            password2: String::new(),
            filename_encryption: "standard".into(),
            directory_name_encryption: true,
            filename_encoding: "base32".into(),
            suffix: ".bin".into(),
            no_data_encryption: false,
            pass_bad_blocks: false,
            strict_names: false,
            cipher_version: "v1".into(),
            exact_size: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config: VeilConfig = toml::from_str("").unwrap();

        assert_eq!(config.remote.service, "s3");
        assert_eq!(config.remote.region, "us-east-1");
        assert_eq!(config.crypt.filename_encryption, "standard");
        assert_eq!(config.crypt.filename_encoding, "base32");
        assert_eq!(config.crypt.suffix, ".bin");
        assert_eq!(config.crypt.cipher_version, "v1");
        assert!(config.crypt.directory_name_encryption);
        assert!(!config.crypt.no_data_encryption);
        assert!(!config.crypt.pass_bad_blocks);
        assert!(!config.crypt.strict_names);
        assert!(!config.crypt.exact_size);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[remote]
service = "s3"
endpoint = "https://s3.example.com"
region = "eu-west-1"
bucket = "secrets"
root = "backups"

[crypt]
password = "correct horse"
password2 = "battery staple"
filename_encryption = "obfuscate"
directory_name_encryption = false
filename_encoding = "base64"
suffix = "none"
cipher_version = "v2"
strict_names = true
"#;
        let config: VeilConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.remote.endpoint, "https://s3.example.com");
        assert_eq!(config.remote.bucket, "secrets");
        assert_eq!(config.remote.root, "backups");
        assert_eq!(config.crypt.password, "correct horse");
        assert_eq!(config.crypt.filename_encryption, "obfuscate");
        assert!(!config.crypt.directory_name_encryption);
        assert_eq!(config.crypt.filename_encoding, "base64");
        assert_eq!(config.crypt.suffix, "none");
        assert_eq!(config.crypt.cipher_version, "v2");
        assert!(config.crypt.strict_names);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypt]
password = "hunter2"
"#;
        let config: VeilConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.crypt.password, "hunter2");
        // Defaults
        assert_eq!(config.crypt.filename_encryption, "standard");
        assert_eq!(config.remote.service, "s3");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VeilConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: VeilConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.remote.endpoint, parsed.remote.endpoint);
        assert_eq!(config.crypt.suffix, parsed.crypt.suffix);
        assert_eq!(config.crypt.cipher_version, parsed.crypt.cipher_version);
    }
}
