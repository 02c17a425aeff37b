//! Configuration for the signing service.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional JSON file, and `SEALER_*` environment variables.
//!
//! ```
//! use pdf_sealer::config::SealerConfig;
//!
//! let config = SealerConfig::new().with_workers(8).with_signed_prefix("sealed/");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.signed_key("doc-1"), "sealed/doc-1");
//! ```

use crate::error::{Error, Result};
use crate::signatures::{IdentityIssuer, IdentitySource, SignOptions, SignerIdentity, MAX_SIGNATURE_RESERVE};
use crate::stamp::StampConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Signing service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealerConfig {
    /// Root directory of the filesystem document store
    pub store_dir: PathBuf,

    /// Number of concurrent signing workers
    pub workers: usize,

    /// Upper bound for one store get or put, in seconds
    pub store_timeout_secs: u64,

    /// Prefix of the signed artifact key
    pub signed_prefix: String,

    /// Also store the stamped, unsigned artifact
    pub store_stamped: bool,

    /// Prefix of the stamped artifact key
    pub stamped_prefix: String,

    /// Deliveries of one message before it is dead-lettered
    pub max_deliveries: u32,

    /// PEM private key of the long-lived signer identity
    pub key_path: Option<PathBuf>,

    /// PEM certificate chain of the long-lived signer identity
    pub cert_path: Option<PathBuf>,

    /// Organization of per-job identities when no key is configured
    pub organization: Option<String>,

    /// Stamp placement and styling
    pub stamp: StampConfig,

    /// Signature dictionary options and placeholder reserve
    pub signing: SignOptions,
}

impl Default for SealerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SealerConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            store_dir: PathBuf::from("documents"),
            workers: 4,
            store_timeout_secs: 30,
            signed_prefix: "signed_".to_string(),
            store_stamped: false,
            stamped_prefix: "stamped_".to_string(),
            max_deliveries: 5,
            key_path: None,
            cert_path: None,
            organization: Some("SecureSign".to_string()),
            stamp: StampConfig::default(),
            signing: SignOptions::default(),
        }
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Apply `SEALER_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `SEALER_*` overrides from an arbitrary lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = lookup("SEALER_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(workers) = lookup("SEALER_WORKERS") {
            self.workers = parse_var("SEALER_WORKERS", &workers)?;
        }
        if let Some(path) = lookup("SEALER_KEY_PATH") {
            self.key_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SEALER_CERT_PATH") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Some(prefix) = lookup("SEALER_SIGNED_PREFIX") {
            self.signed_prefix = prefix;
        }
        if let Some(secs) = lookup("SEALER_STORE_TIMEOUT_SECS") {
            self.store_timeout_secs = parse_var("SEALER_STORE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(reserve) = lookup("SEALER_SIGNATURE_RESERVE") {
            self.signing.signature_reserve = parse_var("SEALER_SIGNATURE_RESERVE", &reserve)?;
        }
        Ok(self)
    }

    /// Set the store directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the store I/O timeout.
    pub fn with_store_timeout_secs(mut self, secs: u64) -> Self {
        self.store_timeout_secs = secs;
        self
    }

    /// Set the signed artifact prefix.
    pub fn with_signed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.signed_prefix = prefix.into();
        self
    }

    /// Store the stamped artifact as well.
    pub fn with_store_stamped(mut self, enable: bool) -> Self {
        self.store_stamped = enable;
        self
    }

    /// Use a long-lived identity from PEM files.
    pub fn with_identity_files(mut self, key_path: impl Into<PathBuf>, cert_path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(key_path.into());
        self.cert_path = Some(cert_path.into());
        self
    }

    /// Set the stamp configuration.
    pub fn with_stamp(mut self, stamp: StampConfig) -> Self {
        self.stamp = stamp;
        self
    }

    /// Set the signing options.
    pub fn with_signing(mut self, signing: SignOptions) -> Self {
        self.signing = signing;
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.signing.signature_reserve == 0 {
            return Err(Error::Config("signature_reserve must be positive".to_string()));
        }
        if self.signing.signature_reserve > MAX_SIGNATURE_RESERVE {
            return Err(Error::Config(format!(
                "signature_reserve must not exceed {} bytes",
                MAX_SIGNATURE_RESERVE
            )));
        }
        if self.signed_prefix.is_empty() {
            return Err(Error::Config(
                "signed_prefix must not be empty, signed artifacts would overwrite originals".to_string(),
            ));
        }
        if self.store_stamped && (self.stamped_prefix.is_empty() || self.stamped_prefix == self.signed_prefix) {
            return Err(Error::Config(
                "stamped_prefix must be non-empty and differ from signed_prefix".to_string(),
            ));
        }
        if self.store_timeout_secs == 0 {
            return Err(Error::Config("store_timeout_secs must be positive".to_string()));
        }
        if self.max_deliveries == 0 {
            return Err(Error::Config("max_deliveries must be at least 1".to_string()));
        }
        if self.key_path.is_some() != self.cert_path.is_some() {
            return Err(Error::Config("key_path and cert_path must be set together".to_string()));
        }
        Ok(())
    }

    /// Store I/O timeout.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Key of the signed artifact for a job.
    pub fn signed_key(&self, document_key: &str) -> String {
        format!("{}{}", self.signed_prefix, document_key)
    }

    /// Key of the stamped artifact for a job.
    pub fn stamped_key(&self, document_key: &str) -> String {
        format!("{}{}", self.stamped_prefix, document_key)
    }

    /// Build the identity source: the configured key pair when present,
    /// otherwise per-job self-signed identities.
    pub fn identity_source(&self) -> Result<IdentitySource> {
        match (&self.key_path, &self.cert_path) {
            (Some(key), Some(cert)) => {
                let identity = SignerIdentity::from_pem_files(key, cert)?;
                log::info!(
                    "Loaded signer identity '{}'",
                    identity.subject().unwrap_or_default()
                );
                Ok(IdentitySource::Static(Arc::new(identity)))
            },
            _ => {
                log::warn!(
                    "No signer key configured; issuing a self-signed certificate per job. \
                     Verifiers will not trust these signatures."
                );
                Ok(IdentitySource::Ephemeral(
                    IdentityIssuer::new().with_organization(self.organization.clone()),
                ))
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SealerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.signed_key("doc-123"), "signed_doc-123");
        assert_eq!(config.stamped_key("doc-123"), "stamped_doc-123");
        assert_eq!(config.store_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_json_keeps_defaults_for_missing_fields() {
        let config = SealerConfig::from_json(r#"{"workers": 2, "signing": {"signature_reserve": 4096}}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.signing.signature_reserve, 4096);
        assert_eq!(config.signing.reason, "Digital Signature by SecureSign");
        assert_eq!(config.signed_prefix, "signed_");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(SealerConfig::from_json("{workers: }"), Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SEALER_WORKERS", "7"),
            ("SEALER_SIGNED_PREFIX", "out/"),
            ("SEALER_SIGNATURE_RESERVE", "1024"),
        ]
        .into_iter()
        .collect();
        let config = SealerConfig::new()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.workers, 7);
        assert_eq!(config.signed_prefix, "out/");
        assert_eq!(config.signing.signature_reserve, 1024);
    }

    #[test]
    fn test_bad_override_value() {
        let result = SealerConfig::new().with_overrides(|name| {
            (name == "SEALER_WORKERS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects() {
        assert!(SealerConfig::new().with_workers(0).validate().is_err());
        assert!(SealerConfig::new().with_signed_prefix("").validate().is_err());
        let mut config = SealerConfig::new();
        config.signing.signature_reserve = 0;
        assert!(config.validate().is_err());
        let mut config = SealerConfig::new();
        config.signing.signature_reserve = MAX_SIGNATURE_RESERVE;
        assert!(config.validate().is_ok());
        config.signing.signature_reserve = MAX_SIGNATURE_RESERVE + 1;
        assert!(config.validate().is_err());
        let mut config = SealerConfig::new();
        config.key_path = Some(PathBuf::from("key.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ephemeral_source_without_key() {
        let source = SealerConfig::new().identity_source().unwrap();
        assert!(source.is_ephemeral());
    }
}
