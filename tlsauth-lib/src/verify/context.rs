//! Per-attempt verification inputs.

use serde::Serialize;

/// The identities a server is expected to prove.
///
/// `hostname` is the name the client connected to. `reference_identities` are
/// alternate names the server is also known by (e.g. SRV-derived targets);
/// matching any of them is as good as matching the hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationContext {
    hostname: String,
    reference_identities: Vec<String>,
}

impl VerificationContext {
    pub fn new(hostname: impl Into<String>) -> Self {
        VerificationContext {
            hostname: hostname.into(),
            reference_identities: Vec::new(),
        }
    }

    /// Add alternate identities. Duplicates of the hostname are dropped.
    pub fn with_reference_identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in identities {
            let id = id.into();
            if !id.eq_ignore_ascii_case(&self.hostname) && !self.reference_identities.contains(&id)
            {
                self.reference_identities.push(id);
            }
        }
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn reference_identities(&self) -> &[String] {
        &self.reference_identities
    }

    /// The hostname followed by every reference identity.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hostname.as_str())
            .chain(self.reference_identities.iter().map(String::as_str))
    }
}
