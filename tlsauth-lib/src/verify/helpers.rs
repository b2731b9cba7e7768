//! Small helper functions for certificate verification.
//!
//! Extraction utilities for names, serials and identities of parsed
//! certificates.

use super::identity::PresentedIdentities;
use crate::oid;
use crate::util;
use std::net::IpAddr;
use x509_parser::prelude::*;

/// Check if a certificate is self-issued (subject == issuer).
pub(crate) fn is_self_issued(cert: &X509Certificate) -> bool {
    cert.subject().as_raw() == cert.issuer().as_raw()
}

/// Self-issued and verifiable with its own key.
pub(crate) fn is_self_signed(cert: &X509Certificate) -> bool {
    is_self_issued(cert) && cert.verify_signature(None).is_ok()
}

/// Collect the SAN DNS/IP entries and subject CN of a leaf.
pub(crate) fn presented_identities(cert: &X509Certificate) -> PresentedIdentities {
    let mut ids = PresentedIdentities {
        common_name: extract_cn(cert),
        ..Default::default()
    };
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for gn in &san.value.general_names {
            match gn {
                GeneralName::DNSName(name) => ids.dns_names.push(name.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Ok(ip) = util::format_ip_bytes(bytes).parse::<IpAddr>() {
                        ids.ip_addresses.push(ip);
                    }
                }
                _ => {}
            }
        }
    }
    ids
}

/// Extract the Common Name from the certificate subject.
pub(crate) fn extract_cn(cert: &X509Certificate) -> Option<String> {
    extract_attr(cert, oid::COMMON_NAME)
}

fn extract_attr(cert: &X509Certificate, attr_oid: &str) -> Option<String> {
    for rdn in cert.subject().iter() {
        for attr in rdn.iter() {
            if attr.attr_type().to_id_string() == attr_oid {
                if let Ok(val) = attr.as_str() {
                    return Some(val.to_string());
                }
            }
        }
    }
    None
}

/// One-line distinguished name, e.g. `CN=example.com, O=Example`.
pub(crate) fn subject_line(cert: &X509Certificate) -> String {
    cert.subject().to_string()
}

pub(crate) fn issuer_line(cert: &X509Certificate) -> String {
    cert.issuer().to_string()
}

/// Extract the serial number from a certificate as a colon-separated hex string.
pub(crate) fn extract_serial_hex(cert: &X509Certificate) -> String {
    util::hex_colon_upper(&cert.serial.to_bytes_be())
}
