//! Certificate fingerprint (digest) computation.

use crate::TlsAuthError;
use digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Digest algorithm for fingerprint computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Lowercase name used as the fingerprint prefix.
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = TlsAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(TlsAuthError::Config(format!(
                "unsupported digest '{}' (use sha256, sha384 or sha512)",
                other
            ))),
        }
    }
}

/// Compute the fingerprint of DER-encoded certificate bytes.
///
/// Returns a colon-separated uppercase hex string (e.g., "AB:CD:EF:...").
pub fn compute_fingerprint(der_bytes: &[u8], algorithm: DigestAlgorithm) -> String {
    let hash_bytes: Vec<u8> = match algorithm {
        DigestAlgorithm::Sha256 => sha2::Sha256::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha384 => sha2::Sha384::digest(der_bytes).to_vec(),
        DigestAlgorithm::Sha512 => sha2::Sha512::digest(der_bytes).to_vec(),
    };
    crate::util::hex_colon_upper(&hash_bytes)
}

/// Stable identity of a certificate for exception lookups.
///
/// Rendered as `<algorithm>:<hex>`, e.g. `sha256:AB:CD:...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint DER bytes with the given digest.
    pub fn of_der(der: &[u8], algorithm: DigestAlgorithm) -> Self {
        Fingerprint(format!(
            "{}:{}",
            algorithm.name(),
            compute_fingerprint(der, algorithm)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest algorithm encoded in the prefix.
    pub fn algorithm(&self) -> Option<DigestAlgorithm> {
        self.0.split_once(':').and_then(|(alg, _)| alg.parse().ok())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = TlsAuthError;

    /// Parse `<algorithm>:<hex>`; hex may be colon-separated or bare, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alg, digest) = s.trim().split_once(':').ok_or_else(|| {
            TlsAuthError::ParseError(format!("fingerprint '{}' lacks an algorithm prefix", s))
        })?;
        let algorithm: DigestAlgorithm = alg.parse()?;
        let bare: String = digest.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(&bare)
            .map_err(|e| TlsAuthError::ParseError(format!("invalid fingerprint hex: {}", e)))?;
        let expected = match algorithm {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        };
        if bytes.len() != expected {
            return Err(TlsAuthError::ParseError(format!(
                "{} fingerprint must be {} bytes, got {}",
                algorithm.name(),
                expected,
                bytes.len()
            )));
        }
        Ok(Fingerprint(format!(
            "{}:{}",
            algorithm.name(),
            crate::util::hex_colon_upper(&bytes)
        )))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = TlsAuthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}
