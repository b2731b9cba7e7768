//! Configuration parsing.
//!
//! A TOML file with four optional sections; every field has a default, so
//! an empty file is a valid configuration.
//!
//! ```toml
//! [trust]
//! system = true
//! ca_files = ["/etc/tlsauth/extra-ca.pem"]
//! crl_files = []
//!
//! [verify]
//! order = ["trust", "validity", "hostname", "revocation", "strength"]
//! composite = false
//!
//! [exceptions]
//! backend = "file"
//!
//! [client]
//! interactive = true
//! idle_timeout_secs = 0
//! ```

use crate::exceptions::{ExceptionStore, FileExceptionStore, MemoryExceptionStore};
use crate::fingerprint::DigestAlgorithm;
use crate::verify::{load_crl_file, CheckKind, TrustStore, VerifyOptions, MAX_PATH_DEPTH};
use crate::TlsAuthError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub trust: TrustConfig,

    #[serde(default)]
    pub verify: VerifyConfig,

    #[serde(default)]
    pub exceptions: ExceptionsConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

/// Trust anchors and revocation lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    /// Load the system CA store.
    #[serde(default = "default_true")]
    pub system: bool,

    /// Extra PEM bundles of trust anchors.
    #[serde(default)]
    pub ca_files: Vec<PathBuf>,

    /// Directories of PEM anchors (OpenSSL `-CApath` layout).
    #[serde(default)]
    pub ca_dirs: Vec<PathBuf>,

    /// CRL files (PEM or DER). Revocation is checked only when non-empty.
    #[serde(default)]
    pub crl_files: Vec<PathBuf>,

    /// Treat any anchored certificate as a path end.
    #[serde(default)]
    pub partial_chain: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            system: true,
            ca_files: Vec::new(),
            ca_dirs: Vec::new(),
            crl_files: Vec::new(),
            partial_chain: false,
        }
    }
}

/// Verification behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    #[serde(default = "default_true")]
    pub check_time: bool,

    /// Fixed RFC 3339 check time instead of the current time.
    #[serde(default)]
    pub at_time: Option<String>,

    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    #[serde(default = "default_true")]
    pub check_strength: bool,

    /// Report every failing check instead of the first one.
    #[serde(default)]
    pub composite: bool,

    #[serde(default = "default_order")]
    pub order: Vec<String>,

    #[serde(default)]
    pub fingerprint_digest: DigestAlgorithm,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            check_time: true,
            at_time: None,
            max_chain_depth: default_max_chain_depth(),
            check_strength: true,
            composite: false,
            order: default_order(),
            fingerprint_digest: DigestAlgorithm::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionBackend {
    #[default]
    File,
    Memory,
}

/// Where user exceptions are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExceptionsConfig {
    #[serde(default)]
    pub backend: ExceptionBackend,

    /// Exception file; defaults to the user data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Client behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Prompt the user on verification failures.
    #[serde(default = "default_true")]
    pub interactive: bool,

    /// Seconds without open prompts before the client exits; 0 exits as soon
    /// as every attempt is decided.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Default `tracing` filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interactive: true,
            idle_timeout_secs: default_idle_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_chain_depth() -> usize {
    MAX_PATH_DEPTH
}

fn default_order() -> Vec<String> {
    CheckKind::DEFAULT_ORDER
        .iter()
        .map(|k| k.name().to_string())
        .collect()
}

fn default_idle_timeout_secs() -> u64 {
    0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, TlsAuthError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TlsAuthError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, TlsAuthError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TlsAuthError> {
        if self.verify.max_chain_depth == 0 {
            return Err(TlsAuthError::Config(
                "verify.max_chain_depth must be at least 1".into(),
            ));
        }
        let order = self.check_order()?;
        for (i, kind) in order.iter().enumerate() {
            if order.iter().skip(i + 1).any(|k| k == kind) {
                return Err(TlsAuthError::Config(format!(
                    "check '{}' listed twice in verify.order",
                    kind
                )));
            }
        }
        self.at_time()?;
        Ok(())
    }

    fn check_order(&self) -> Result<Vec<CheckKind>, TlsAuthError> {
        self.verify.order.iter().map(|s| s.parse()).collect()
    }

    fn at_time(&self) -> Result<Option<i64>, TlsAuthError> {
        self.verify
            .at_time
            .as_deref()
            .map(|s| {
                OffsetDateTime::parse(s, &Rfc3339)
                    .map(OffsetDateTime::unix_timestamp)
                    .map_err(|e| TlsAuthError::Config(format!("verify.at_time '{}': {}", s, e)))
            })
            .transpose()
    }

    /// Build verifier options, loading any configured CRL files.
    pub fn verify_options(&self) -> Result<VerifyOptions, TlsAuthError> {
        let mut crl_ders = Vec::new();
        for path in &self.trust.crl_files {
            crl_ders.extend(load_crl_file(path)?);
        }
        Ok(VerifyOptions {
            check_time: self.verify.check_time,
            at_time: self.at_time()?,
            partial_chain: self.trust.partial_chain,
            max_chain_depth: self.verify.max_chain_depth,
            crl_ders,
            check_strength: self.verify.check_strength,
            composite: self.verify.composite,
            order: self.check_order()?,
            fingerprint_digest: self.verify.fingerprint_digest,
        })
    }

    /// Load the configured trust anchors.
    pub fn build_trust_store(&self) -> Result<TrustStore, TlsAuthError> {
        let mut store = TrustStore::new();
        if self.trust.system {
            if let Err(e) = store.add_system() {
                tracing::warn!(error = %e, "system trust store unavailable");
            }
        }
        for path in &self.trust.ca_files {
            store.add_pem_file(path)?;
        }
        for dir in &self.trust.ca_dirs {
            store.add_pem_directory(dir)?;
        }
        Ok(store)
    }

    /// Path of the exception file, if the file backend is used.
    pub fn exception_store_path(&self) -> Option<PathBuf> {
        match self.exceptions.backend {
            ExceptionBackend::Memory => None,
            ExceptionBackend::File => self
                .exceptions
                .path
                .clone()
                .or_else(FileExceptionStore::default_path),
        }
    }

    /// Open the configured exception store.
    pub fn open_exception_store(&self) -> Result<Arc<dyn ExceptionStore>, TlsAuthError> {
        match (self.exceptions.backend, self.exception_store_path()) {
            (ExceptionBackend::File, Some(path)) => Ok(Arc::new(FileExceptionStore::open(path)?)),
            (ExceptionBackend::File, None) => Err(TlsAuthError::Config(
                "no data directory for the exception file; set exceptions.path".into(),
            )),
            (ExceptionBackend::Memory, _) => Ok(Arc::new(MemoryExceptionStore::new())),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client.idle_timeout_secs)
    }
}
