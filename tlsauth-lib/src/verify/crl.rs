//! CRL-based revocation checking.

use crate::TlsAuthError;
use std::path::Path;
use tracing::debug;
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

/// Parse a PEM-encoded CRL file into DER-encoded CRLs.
pub fn parse_pem_crl(input: &[u8]) -> Result<Vec<Vec<u8>>, TlsAuthError> {
    let mut crls = Vec::new();
    for pem_result in Pem::iter_from_buffer(input) {
        match pem_result {
            Ok(pem) if pem.label == "X509 CRL" => crls.push(pem.contents),
            Ok(_) => {}
            Err(e) => {
                if !crls.is_empty() {
                    break;
                }
                return Err(TlsAuthError::PemError(format!(
                    "failed to parse CRL PEM: {}",
                    e
                )));
            }
        }
    }
    if crls.is_empty() {
        return Err(TlsAuthError::PemError("no CRLs found in PEM input".into()));
    }
    Ok(crls)
}

/// Load a CRL file in PEM or DER form.
pub fn load_crl_file(path: &Path) -> Result<Vec<Vec<u8>>, TlsAuthError> {
    let data = std::fs::read(path).map_err(|e| {
        TlsAuthError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    if data.starts_with(b"-----BEGIN") {
        return parse_pem_crl(&data);
    }
    CertificateRevocationList::from_der(&data)
        .map_err(|e| TlsAuthError::DerError(format!("{}: {}", path.display(), e)))?;
    Ok(vec![data])
}

/// RFC 5280 reason code name.
pub(crate) fn format_crl_reason(rc: &x509_parser::x509::ReasonCode) -> &'static str {
    match rc.0 {
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => "unspecified",
    }
}

/// Whether `cert` is listed as revoked by one of `crl_ders`.
///
/// Only CRLs issued by the certificate's issuer, currently valid at `now_ts`,
/// and (when `issuer_cert` is known) correctly signed are consulted. Returns
/// the revocation reason when revoked.
pub fn check_crl_revocation(
    cert: &X509Certificate,
    crl_ders: &[Vec<u8>],
    issuer_cert: Option<&X509Certificate>,
    now_ts: i64,
) -> Option<String> {
    let serial = cert.raw_serial();

    for crl_der in crl_ders {
        let Ok((_, crl)) = CertificateRevocationList::from_der(crl_der) else {
            continue;
        };
        if crl.issuer() != cert.issuer() {
            continue;
        }
        let current = now_ts >= crl.last_update().timestamp()
            && crl
                .next_update()
                .map_or(true, |next| now_ts <= next.timestamp());
        if !current {
            debug!(issuer = %crl.issuer(), "skipping CRL outside its validity period");
            continue;
        }
        if let Some(issuer) = issuer_cert {
            if crl.verify_signature(issuer.public_key()).is_err() {
                debug!(issuer = %crl.issuer(), "skipping CRL with bad signature");
                continue;
            }
        }

        let revoked = crl
            .iter_revoked_certificates()
            .find(|r| r.raw_serial() == serial);
        if let Some(revoked) = revoked {
            let reason = revoked
                .reason_code()
                .map(|rc| format_crl_reason(&rc.1))
                .unwrap_or("unspecified");
            return Some(reason.to_string());
        }
    }

    None
}
