//! Server identity matching (RFC 6125).
//!
//! DNS names compare case-insensitively with a single trailing dot ignored.
//! A wildcard is only accepted as the whole left-most label of a pattern with
//! at least two further labels, and it stands for exactly one label:
//! `*.example.com` matches `foo.example.com` but not `example.com` or
//! `a.b.example.com`. IP literals only match SAN iPAddress entries.

use std::net::IpAddr;

/// Names extracted from a leaf certificate for identity matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentedIdentities {
    /// SAN dNSName entries.
    pub dns_names: Vec<String>,
    /// SAN iPAddress entries.
    pub ip_addresses: Vec<IpAddr>,
    /// Subject common name, consulted only without dNSName SANs.
    pub common_name: Option<String>,
}

impl PresentedIdentities {
    /// Whether `reference` (a hostname or IP literal) is covered.
    pub fn matches(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if let Some(ip) = parse_ip_literal(reference) {
            return self.ip_addresses.contains(&ip);
        }
        if self.dns_names.is_empty() {
            return self
                .common_name
                .as_deref()
                .is_some_and(|cn| dns_name_matches(cn, reference));
        }
        self.dns_names
            .iter()
            .any(|pattern| dns_name_matches(pattern, reference))
    }

    /// Names to show a user when no identity matched.
    pub fn display_names(&self) -> Vec<String> {
        let mut names = self.dns_names.clone();
        names.extend(self.ip_addresses.iter().map(IpAddr::to_string));
        if names.is_empty() {
            if let Some(cn) = &self.common_name {
                names.push(cn.clone());
            }
        }
        names
    }
}

/// Parse an IP literal, accepting bracketed IPv6 (`[::1]`).
fn parse_ip_literal(s: &str) -> Option<IpAddr> {
    let s = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s);
    s.parse().ok()
}

fn normalize(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Match a presented DNS name (possibly a wildcard) against a reference name.
pub fn dns_name_matches(pattern: &str, reference: &str) -> bool {
    let pattern = normalize(pattern);
    let reference = normalize(reference);
    // Reference identities are concrete names; a `*` in one matches nothing.
    if pattern.is_empty() || reference.is_empty() || reference.contains('*') {
        return false;
    }

    let Some(base) = pattern.strip_prefix("*.") else {
        return !pattern.contains('*') && pattern == reference;
    };

    // A wildcard over a single label (`*.com`) would cover a whole TLD.
    if base.contains('*') || !base.contains('.') {
        return false;
    }
    if parse_ip_literal(&reference).is_some() {
        return false;
    }
    match reference.split_once('.') {
        Some((first, rest)) => !first.is_empty() && rest == base,
        None => false,
    }
}
