//! Certificate chains as presented by a server.
//!
//! A [`CertificateChain`] is the ordered list of DER blobs fetched from the
//! remote certificate object, leaf first. It is immutable once built.

use crate::fingerprint::{DigestAlgorithm, Fingerprint};
use crate::util;
use crate::TlsAuthError;
use x509_parser::prelude::*;

/// Ordered, non-empty sequence of DER-encoded certificates (leaf first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certs: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Build a chain from DER blobs. Fails if the list is empty or any blob is
    /// zero-length; the blobs are not parsed here.
    pub fn from_der_list(certs: Vec<Vec<u8>>) -> Result<Self, TlsAuthError> {
        if certs.is_empty() {
            return Err(TlsAuthError::DerError("empty certificate chain".into()));
        }
        if let Some(pos) = certs.iter().position(|c| c.is_empty()) {
            return Err(TlsAuthError::DerError(format!(
                "certificate at depth {} is empty",
                pos
            )));
        }
        Ok(CertificateChain { certs })
    }

    /// Build a chain from a PEM bundle, leaf first.
    pub fn from_pem(input: &[u8]) -> Result<Self, TlsAuthError> {
        Self::from_der_list(parse_pem_chain(input)?)
    }

    /// Auto-detect the input: a PEM bundle, or a single DER certificate.
    pub fn from_pem_or_der(input: &[u8]) -> Result<Self, TlsAuthError> {
        let start = input
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(input.len());
        let trimmed = input.get(start..).unwrap_or_default();
        if trimmed.starts_with(b"-----BEGIN") {
            return Self::from_pem(trimmed);
        }
        X509Certificate::from_der(input).map_err(|e| {
            TlsAuthError::DerError(format!("failed to parse DER certificate: {}", e))
        })?;
        Self::from_der_list(vec![input.to_vec()])
    }

    /// DER bytes of the leaf certificate.
    #[allow(clippy::indexing_slicing)] // non-empty by construction
    pub fn leaf(&self) -> &[u8] {
        &self.certs[0]
    }

    /// DER bytes of the certificates after the leaf.
    #[allow(clippy::indexing_slicing)] // non-empty by construction
    pub fn intermediates(&self) -> &[Vec<u8>] {
        &self.certs[1..]
    }

    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Fingerprint of the leaf certificate.
    pub fn fingerprint(&self, algorithm: DigestAlgorithm) -> Fingerprint {
        Fingerprint::of_der(self.leaf(), algorithm)
    }

    /// Render the chain as concatenated PEM blocks.
    pub fn to_pem(&self) -> String {
        self.certs.iter().map(|der| der_to_pem(der)).collect()
    }
}

/// Convert DER-encoded certificate bytes to a PEM string.
pub fn der_to_pem(der: &[u8]) -> String {
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        util::base64_wrap(der)
    )
}

/// Parse a PEM-encoded file containing one or more certificates into
/// individual DER-encoded certificates.
pub fn parse_pem_chain(input: &[u8]) -> Result<Vec<Vec<u8>>, TlsAuthError> {
    let mut certs = Vec::new();

    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) => {
                if pem.label == "CERTIFICATE" || pem.label == "TRUSTED CERTIFICATE" {
                    certs.push(pem.contents);
                }
            }
            Err(e) => {
                // Trailing garbage after at least one certificate is tolerated.
                if !certs.is_empty() {
                    break;
                }
                return Err(TlsAuthError::PemError(format!("failed to parse PEM: {}", e)));
            }
        }
    }

    if certs.is_empty() {
        return Err(TlsAuthError::PemError(
            "no certificates found in PEM input".into(),
        ));
    }

    Ok(certs)
}
