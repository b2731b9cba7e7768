//! Trust anchors for chain-of-trust checks.
//!
//! [`TrustStore`] holds the CA certificates a server chain must lead to. It is
//! built once per process (from configuration) and shared read-only between
//! concurrent verifications.

use crate::TlsAuthError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// Well-known CA bundle file paths, in order of preference.
pub(crate) const KNOWN_CA_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt", // Debian/Ubuntu
    "/etc/pki/tls/certs/ca-bundle.crt",   // RHEL/CentOS/Fedora
    "/etc/ssl/ca-bundle.pem",             // openSUSE
    "/etc/ssl/cert.pem",                  // macOS, Alpine
];

/// Well-known CA certificate directory paths.
pub(crate) const KNOWN_CA_DIR_PATHS: &[&str] = &["/etc/ssl/certs"];

/// Matches `.pem`, `.crt`, `.cer` and OpenSSL hash links (`a1b2c3d4.0`).
fn is_pem_cert_file(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    matches!(ext, "pem" | "crt" | "cer")
        || (ext.len() == 1 && ext.bytes().next().is_some_and(|b| b.is_ascii_digit()))
}

/// A set of trusted CA certificates, indexed by raw subject name.
#[derive(Default)]
pub struct TrustStore {
    by_subject: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    anchors: HashSet<Vec<u8>>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("anchors", &self.anchors.len())
            .finish()
    }
}

impl TrustStore {
    /// Create an empty trust store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the system anchors to this store.
    pub fn add_system(&mut self) -> Result<usize, TlsAuthError> {
        if let Some(bundle) = find_system_ca_bundle() {
            if let Ok(data) = std::fs::read(&bundle) {
                let added = self.add_pem_bundle(&data)?;
                if added > 0 {
                    debug!(path = %bundle.display(), added, "loaded system CA bundle");
                    return Ok(added);
                }
            }
        }

        let probe = openssl_probe::probe();
        let dirs = std::env::var("SSL_CERT_DIR")
            .ok()
            .map(PathBuf::from)
            .into_iter()
            .chain(probe.cert_dir)
            .chain(KNOWN_CA_DIR_PATHS.iter().map(PathBuf::from));
        for dir in dirs {
            if let Ok(added) = self.add_pem_directory(&dir) {
                if added > 0 {
                    debug!(path = %dir.display(), added, "loaded system CA directory");
                    return Ok(added);
                }
            }
        }

        Err(TlsAuthError::VerifyError("no system trust store found".into()))
    }

    /// Create a trust store from a PEM file path.
    pub fn from_pem_file(path: &Path) -> Result<Self, TlsAuthError> {
        let mut store = TrustStore::new();
        store.add_pem_file(path)?;
        Ok(store)
    }

    /// Add a DER-encoded certificate. Duplicates are ignored.
    pub fn add_der(&mut self, der: &[u8]) -> Result<(), TlsAuthError> {
        let (_, x509) =
            X509Certificate::from_der(der).map_err(|e| TlsAuthError::DerError(format!("{}", e)))?;
        if self.anchors.insert(der.to_vec()) {
            self.by_subject
                .entry(x509.subject().as_raw().to_vec())
                .or_default()
                .push(der.to_vec());
        }
        Ok(())
    }

    /// Add all certificates of a PEM bundle, skipping entries that fail to
    /// parse. Returns how many were added.
    pub fn add_pem_bundle(&mut self, pem_data: &[u8]) -> Result<usize, TlsAuthError> {
        let certs = crate::chain::parse_pem_chain(pem_data)?;
        let before = self.len();
        for cert_der in certs {
            if let Err(e) = self.add_der(&cert_der) {
                warn!(error = %e, "skipping unparsable trust anchor");
            }
        }
        Ok(self.len() - before)
    }

    pub fn add_pem_file(&mut self, path: &Path) -> Result<usize, TlsAuthError> {
        let data = std::fs::read(path).map_err(|e| {
            TlsAuthError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        self.add_pem_bundle(&data)
    }

    /// Load every certificate file of a directory (like OpenSSL's -CApath).
    pub fn add_pem_directory(&mut self, dir: &Path) -> Result<usize, TlsAuthError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            TlsAuthError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", dir.display(), e),
            ))
        })?;
        let mut total = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_pem_cert_file(&path) {
                if let Ok(data) = std::fs::read(&path) {
                    total += self.add_pem_bundle(&data).unwrap_or(0);
                }
            }
        }
        Ok(total)
    }

    /// Anchors whose subject equals the given raw issuer name.
    pub(crate) fn find_by_subject_raw(&self, subject_raw: &[u8]) -> &[Vec<u8>] {
        self.by_subject
            .get(subject_raw)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Whether this exact DER certificate is an anchor.
    pub fn contains(&self, der: &[u8]) -> bool {
        self.anchors.contains(der)
    }
}

/// Find the system CA bundle path (same location OpenSSL uses).
///
/// Checks `SSL_CERT_FILE`, then `openssl-probe`, then well-known paths.
pub fn find_system_ca_bundle() -> Option<PathBuf> {
    std::env::var("SSL_CERT_FILE")
        .ok()
        .map(PathBuf::from)
        .into_iter()
        .chain(openssl_probe::probe().cert_file)
        .chain(KNOWN_CA_BUNDLE_PATHS.iter().map(PathBuf::from))
        .find(|p| p.exists())
}
