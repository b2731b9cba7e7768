//! Certification path building.
//!
//! Servers often send intermediates out of order, send extra certificates, or
//! include the root. The builder searches the presented intermediates
//! depth-first (with backtracking) for a path from the leaf to a trust anchor.

use super::helpers::is_self_signed;
use super::TrustStore;
use x509_parser::prelude::*;

/// Hard cap on path length while searching.
pub const MAX_PATH_DEPTH: usize = 32;

/// Signature verifications one search may spend before giving up.
pub const MAX_SIGNATURE_CHECKS: usize = 256;

/// Outcome of path building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CertPath {
    /// DER certificates from the leaf upward (the anchor itself excluded
    /// unless the server sent it).
    pub certs: Vec<Vec<u8>>,
    /// The trust anchor the path terminates at, if any.
    pub anchor: Option<Vec<u8>>,
}

impl CertPath {
    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }
}

/// Build a path from `leaf_der` through `intermediates` to an anchor.
///
/// When `partial_chain` is set, any presented certificate that is itself an
/// anchor terminates the path. Without an anchored path, the longest chain of
/// correctly-signed links found is returned so callers can report on it.
pub(crate) fn build_path(
    leaf_der: &[u8],
    intermediates: &[(Vec<u8>, X509Certificate)],
    trust_store: &TrustStore,
    partial_chain: bool,
) -> CertPath {
    let Ok((_, leaf)) = X509Certificate::from_der(leaf_der) else {
        return CertPath {
            certs: vec![leaf_der.to_vec()],
            anchor: None,
        };
    };

    let mut search = Search {
        intermediates,
        trust_store,
        partial_chain,
        used: vec![false; intermediates.len()],
        dead_ends: vec![false; intermediates.len()],
        signature_checks: 0,
        current: vec![leaf_der.to_vec()],
        longest: vec![leaf_der.to_vec()],
    };
    match search.extend(&leaf) {
        Some(anchor) => CertPath {
            certs: search.current,
            anchor: Some(anchor),
        },
        None => CertPath {
            certs: search.longest,
            anchor: None,
        },
    }
}

struct Search<'a, 'b> {
    intermediates: &'a [(Vec<u8>, X509Certificate<'b>)],
    trust_store: &'a TrustStore,
    partial_chain: bool,
    used: Vec<bool>,
    /// Intermediates already explored without reaching an anchor.
    dead_ends: Vec<bool>,
    signature_checks: usize,
    current: Vec<Vec<u8>>,
    longest: Vec<Vec<u8>>,
}

impl Search<'_, '_> {
    /// Try to finish the path above `tip`; returns the anchor on success and
    /// leaves `self.current` holding the anchored path.
    fn extend(&mut self, tip: &X509Certificate) -> Option<Vec<u8>> {
        if self.current.len() > self.longest.len() {
            self.longest = self.current.clone();
        }

        if let Some(tip_der) = self.current.last() {
            let anchored_tip = self.trust_store.contains(tip_der)
                && (self.partial_chain || is_self_signed(tip));
            if anchored_tip {
                return Some(tip_der.clone());
            }
        }

        let issuer_raw = tip.issuer().as_raw();
        let trust_store = self.trust_store;
        for root_der in trust_store.find_by_subject_raw(issuer_raw) {
            if let Ok((_, root)) = X509Certificate::from_der(root_der) {
                if self.signature_matches(tip, &root) {
                    return Some(root_der.clone());
                }
            }
        }

        if self.current.len() >= MAX_PATH_DEPTH {
            return None;
        }

        let intermediates = self.intermediates;
        for (idx, (der, cert)) in intermediates.iter().enumerate() {
            let skip = self.used.get(idx).copied().unwrap_or(true)
                || self.dead_ends.get(idx).copied().unwrap_or(true);
            if skip
                || cert.subject().as_raw() != issuer_raw
                || !self.signature_matches(tip, cert)
            {
                continue;
            }

            set(&mut self.used, idx, true);
            self.current.push(der.clone());
            if let Some(anchor) = self.extend(cert) {
                return Some(anchor);
            }
            self.current.pop();
            set(&mut self.used, idx, false);
            set(&mut self.dead_ends, idx, true);
        }

        None
    }

    /// Check that `issuer` signed `cert`, charging the search budget. Once the
    /// budget is spent every further check fails.
    fn signature_matches(&mut self, cert: &X509Certificate, issuer: &X509Certificate) -> bool {
        if self.signature_checks >= MAX_SIGNATURE_CHECKS {
            return false;
        }
        self.signature_checks += 1;
        cert.verify_signature(Some(issuer.public_key())).is_ok()
    }
}

fn set(flags: &mut [bool], idx: usize, value: bool) {
    if let Some(slot) = flags.get_mut(idx) {
        *slot = value;
    }
}
