//! Individual verification checks.
//!
//! Each check inspects a [`ChainView`] and returns the details of the first
//! problem it finds, or `None` when the chain passes.

use super::context::VerificationContext;
use super::crl::check_crl_revocation;
use super::helpers::{
    extract_serial_hex, is_self_signed, issuer_line, presented_identities, subject_line,
};
use super::path::CertPath;
use super::reason::RejectDetails;
use crate::oid;
use crate::util;
use x509_parser::prelude::*;

/// A presented chain with its leaf parsed and a certification path built.
pub(crate) struct ChainView<'a> {
    pub leaf: X509Certificate<'a>,
    pub path: CertPath,
    /// Number of certificates the server sent.
    pub presented: usize,
}

impl ChainView<'_> {
    /// DER certificates that issued the path's certificates, paired with the
    /// depth they sit at. Includes the anchor unless it is already the last
    /// element of the path.
    fn issuers(&self) -> Vec<(usize, &[u8])> {
        let mut issuers: Vec<(usize, &[u8])> = self
            .path
            .certs
            .iter()
            .enumerate()
            .skip(1)
            .map(|(depth, der)| (depth, der.as_slice()))
            .collect();
        if let Some(anchor) = &self.path.anchor {
            if self.path.certs.last() != Some(anchor) {
                issuers.push((self.path.certs.len(), anchor.as_slice()));
            }
        }
        issuers
    }

    /// Issuer of the path certificate at `depth`, if known.
    fn issuer_of(&self, depth: usize) -> Option<&[u8]> {
        self.path
            .certs
            .get(depth + 1)
            .or(self.path.anchor.as_ref())
            .map(Vec::as_slice)
    }
}

/// Chain of trust: the path must reach an anchor through CA certificates.
pub(crate) fn check_trust(view: &ChainView) -> Option<RejectDetails> {
    if !view.path.is_anchored() {
        if view.presented == 1 && is_self_signed(&view.leaf) {
            return Some(RejectDetails::SelfSigned {
                subject: subject_line(&view.leaf),
            });
        }
        let top = view
            .path
            .certs
            .last()
            .and_then(|der| X509Certificate::from_der(der).ok())
            .map(|(_, cert)| (subject_line(&cert), issuer_line(&cert)));
        let (subject, issuer) =
            top.unwrap_or_else(|| (subject_line(&view.leaf), issuer_line(&view.leaf)));
        return Some(RejectDetails::Untrusted {
            subject,
            issuer,
            message: "unable to get local issuer certificate".into(),
        });
    }

    for (depth, der) in view.issuers() {
        let Ok((_, cert)) = X509Certificate::from_der(der) else {
            continue;
        };
        if !acts_as_ca(&cert) {
            return Some(RejectDetails::Untrusted {
                subject: subject_line(&cert),
                issuer: issuer_line(&cert),
                message: format!(
                    "certificate at depth {} is not a CA but is used as issuer",
                    depth
                ),
            });
        }
    }
    None
}

/// CA:TRUE, or a v1 certificate that predates BasicConstraints.
fn acts_as_ca(cert: &X509Certificate) -> bool {
    match cert.basic_constraints() {
        Ok(Some(bc)) => bc.value.ca,
        Ok(None) => cert.version().0 < 2,
        Err(_) => false,
    }
}

/// Validity window of every certificate on the built path, leaf first.
/// Extra certificates the server sent but the path does not use are ignored.
pub(crate) fn check_validity(view: &ChainView, now_ts: i64) -> Option<RejectDetails> {
    let above_leaf = view
        .path
        .certs
        .iter()
        .skip(1)
        .filter_map(|der| X509Certificate::from_der(der).ok().map(|(_, cert)| cert));
    let certs = std::iter::once(view.leaf.clone()).chain(above_leaf);
    for cert in certs {
        let cert = &cert;
        let validity = cert.validity();
        if now_ts > validity.not_after.timestamp() {
            return Some(RejectDetails::Expired {
                subject: subject_line(cert),
                not_after: util::format_timestamp(validity.not_after.timestamp()),
                checked_at: util::format_timestamp(now_ts),
            });
        }
        if now_ts < validity.not_before.timestamp() {
            return Some(RejectDetails::NotActivated {
                subject: subject_line(cert),
                not_before: util::format_timestamp(validity.not_before.timestamp()),
                checked_at: util::format_timestamp(now_ts),
            });
        }
    }
    None
}

/// The hostname or one of the reference identities must match the leaf.
pub(crate) fn check_hostname(view: &ChainView, ctx: &VerificationContext) -> Option<RejectDetails> {
    let presented = presented_identities(&view.leaf);
    if ctx.identities().any(|id| presented.matches(id)) {
        return None;
    }
    Some(RejectDetails::HostnameMismatch {
        expected_hostname: ctx.hostname().to_string(),
        reference_identities: ctx.reference_identities().to_vec(),
        certificate_hostnames: presented.display_names(),
    })
}

/// Revocation of every non-anchor certificate on the path.
pub(crate) fn check_revocation(
    view: &ChainView,
    crl_ders: &[Vec<u8>],
    now_ts: i64,
) -> Option<RejectDetails> {
    for (depth, der) in view.path.certs.iter().enumerate() {
        if view.path.anchor.as_ref() == Some(der) {
            break;
        }
        let Ok((_, cert)) = X509Certificate::from_der(der) else {
            continue;
        };
        let issuer = view
            .issuer_of(depth)
            .and_then(|d| X509Certificate::from_der(d).ok())
            .map(|(_, c)| c);
        if let Some(crl_reason) = check_crl_revocation(&cert, crl_ders, issuer.as_ref(), now_ts) {
            return Some(RejectDetails::Revoked {
                subject: subject_line(&cert),
                serial: extract_serial_hex(&cert),
                crl_reason,
            });
        }
    }
    None
}

/// Weak keys or signatures anywhere below the anchor.
pub(crate) fn check_strength(view: &ChainView) -> Option<RejectDetails> {
    for der in &view.path.certs {
        let Ok((_, cert)) = X509Certificate::from_der(der) else {
            continue;
        };
        let finding = weak_key(&cert).or_else(|| {
            // A root's self-signature is never relied upon.
            if is_self_signed(&cert) {
                None
            } else {
                weak_signature(&cert)
            }
        });
        if let Some(message) = finding {
            return Some(RejectDetails::InsecureCipher {
                subject: subject_line(&cert),
                message,
            });
        }
    }
    None
}

pub(crate) fn weak_key(cert: &X509Certificate) -> Option<String> {
    let pk = cert.public_key();
    match pk.algorithm.algorithm.to_id_string().as_str() {
        oid::DSA => Some("uses a DSA key".into()),
        oid::RSA_ENCRYPTION => {
            let Ok(x509_parser::public_key::PublicKey::RSA(rsa)) = pk.parsed() else {
                return None;
            };
            let bits = modulus_bits(rsa.modulus);
            (bits < 2048).then(|| format!("has a weak RSA key ({} bits, minimum 2048)", bits))
        }
        oid::EC_PUBLIC_KEY => {
            let curve = pk
                .algorithm
                .parameters
                .as_ref()
                .and_then(|p| p.as_oid().ok())
                .map(|o| o.to_id_string());
            (curve.as_deref() == Some(oid::CURVE_P192)).then(|| "uses the P-192 curve".into())
        }
        _ => None,
    }
}

/// Bit length of a big-endian unsigned integer.
fn modulus_bits(modulus: &[u8]) -> usize {
    let start = modulus
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(modulus.len());
    let significant = modulus.get(start..).unwrap_or_default();
    significant
        .first()
        .map_or(0, |top| significant.len() * 8 - top.leading_zeros() as usize)
}

pub(crate) fn weak_signature(cert: &X509Certificate) -> Option<String> {
    let alg = cert.signature_algorithm.algorithm.to_id_string();
    let name = match alg.as_str() {
        oid::MD5_WITH_RSA => "md5WithRSAEncryption",
        oid::SHA1_WITH_RSA => "sha1WithRSAEncryption",
        oid::ECDSA_WITH_SHA1 => "ecdsa-with-SHA1",
        oid::DSA_WITH_SHA1 => "dsa-with-SHA1",
        _ => return None,
    };
    Some(format!("is signed with {}", name))
}
