//! Rejection reasons and their structured details.
//!
//! Internally each rejection is a typed [`RejectDetails`] variant carrying
//! exactly the fields its reason needs. The map-shaped [`WireRejection`] form
//! is produced and consumed only at the transport boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Detail key flagging a rejection the user chose explicitly.
pub const USER_REQUESTED: &str = "user-requested";
/// Detail key carrying a free-form diagnostic.
pub const DEBUG_MESSAGE: &str = "debug-message";
/// Detail key carrying the hostname the client expected.
pub const EXPECTED_HOSTNAME: &str = "expected-hostname";
/// Detail key carrying the names the certificate is valid for.
pub const CERTIFICATE_HOSTNAMES: &str = "certificate-hostnames";

const ERROR_PREFIX: &str = "org.freedesktop.Telepathy.Error.Cert.";

/// Why a certificate was not trusted automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    Unknown,
    Untrusted,
    Expired,
    NotActivated,
    FingerprintMismatch,
    HostnameMismatch,
    SelfSigned,
    Revoked,
    InsecureCipher,
    LimitExceeded,
}

impl RejectReason {
    pub const ALL: [RejectReason; 10] = [
        RejectReason::Unknown,
        RejectReason::Untrusted,
        RejectReason::Expired,
        RejectReason::NotActivated,
        RejectReason::FingerprintMismatch,
        RejectReason::HostnameMismatch,
        RejectReason::SelfSigned,
        RejectReason::Revoked,
        RejectReason::InsecureCipher,
        RejectReason::LimitExceeded,
    ];

    /// Numeric code used on the wire.
    pub fn code(self) -> u32 {
        match self {
            RejectReason::Unknown => 0,
            RejectReason::Untrusted => 1,
            RejectReason::Expired => 2,
            RejectReason::NotActivated => 3,
            RejectReason::FingerprintMismatch => 4,
            RejectReason::HostnameMismatch => 5,
            RejectReason::SelfSigned => 6,
            RejectReason::Revoked => 7,
            RejectReason::InsecureCipher => 8,
            RejectReason::LimitExceeded => 9,
        }
    }

    /// Reason for a wire code; unrecognized codes map to `Unknown`.
    pub fn from_code(code: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .unwrap_or(RejectReason::Unknown)
    }

    /// D-Bus error name paired with the reason on the wire.
    pub fn error_name(self) -> String {
        let suffix = match self {
            RejectReason::Unknown => "Invalid",
            RejectReason::Untrusted => "Untrusted",
            RejectReason::Expired => "Expired",
            RejectReason::NotActivated => "NotActivated",
            RejectReason::FingerprintMismatch => "FingerprintMismatch",
            RejectReason::HostnameMismatch => "HostnameMismatch",
            RejectReason::SelfSigned => "SelfSigned",
            RejectReason::Revoked => "Revoked",
            RejectReason::InsecureCipher => "Insecure",
            RejectReason::LimitExceeded => "LimitExceeded",
        };
        format!("{}{}", ERROR_PREFIX, suffix)
    }

    /// Sentence shown to a user deciding whether to trust the certificate.
    pub fn describe(self) -> &'static str {
        match self {
            RejectReason::Unknown => "The certificate is malformed.",
            RejectReason::Untrusted => {
                "The certificate is not signed by a Certification Authority."
            }
            RejectReason::Expired => "The certificate has expired.",
            RejectReason::NotActivated => "The certificate hasn't yet been activated.",
            RejectReason::FingerprintMismatch => {
                "The certificate does not have the expected fingerprint."
            }
            RejectReason::HostnameMismatch => {
                "The hostname verified by the certificate doesn't match the server name."
            }
            RejectReason::SelfSigned => "The certificate is self-signed.",
            RejectReason::Revoked => {
                "The certificate has been revoked by the issuing Certification Authority."
            }
            RejectReason::InsecureCipher => "The certificate is cryptographically weak.",
            RejectReason::LimitExceeded => "The certificate length exceeds verifiable limits.",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Structured details of a rejection, one variant per [`RejectReason`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum RejectDetails {
    Unknown {
        message: String,
    },
    Untrusted {
        subject: String,
        issuer: String,
        message: String,
    },
    Expired {
        subject: String,
        not_after: String,
        checked_at: String,
    },
    NotActivated {
        subject: String,
        not_before: String,
        checked_at: String,
    },
    FingerprintMismatch {
        expected: String,
        actual: String,
    },
    HostnameMismatch {
        expected_hostname: String,
        reference_identities: Vec<String>,
        certificate_hostnames: Vec<String>,
    },
    SelfSigned {
        subject: String,
    },
    Revoked {
        subject: String,
        serial: String,
        crl_reason: String,
    },
    InsecureCipher {
        subject: String,
        message: String,
    },
    LimitExceeded {
        chain_length: usize,
        limit: usize,
    },
}

impl RejectDetails {
    pub fn reason(&self) -> RejectReason {
        match self {
            RejectDetails::Unknown { .. } => RejectReason::Unknown,
            RejectDetails::Untrusted { .. } => RejectReason::Untrusted,
            RejectDetails::Expired { .. } => RejectReason::Expired,
            RejectDetails::NotActivated { .. } => RejectReason::NotActivated,
            RejectDetails::FingerprintMismatch { .. } => RejectReason::FingerprintMismatch,
            RejectDetails::HostnameMismatch { .. } => RejectReason::HostnameMismatch,
            RejectDetails::SelfSigned { .. } => RejectReason::SelfSigned,
            RejectDetails::Revoked { .. } => RejectReason::Revoked,
            RejectDetails::InsecureCipher { .. } => RejectReason::InsecureCipher,
            RejectDetails::LimitExceeded { .. } => RejectReason::LimitExceeded,
        }
    }

    /// One-line explanation of the specific failure.
    pub fn debug_message(&self) -> String {
        match self {
            RejectDetails::Unknown { message } => message.clone(),
            RejectDetails::Untrusted {
                subject,
                issuer,
                message,
            } => format!("{} (subject: {}, issuer: {})", message, subject, issuer),
            RejectDetails::Expired {
                subject,
                not_after,
                checked_at,
            } => format!(
                "certificate ({}) expired at {}, checked at {}",
                subject, not_after, checked_at
            ),
            RejectDetails::NotActivated {
                subject,
                not_before,
                checked_at,
            } => format!(
                "certificate ({}) is not valid before {}, checked at {}",
                subject, not_before, checked_at
            ),
            RejectDetails::FingerprintMismatch { expected, actual } => {
                format!("expected fingerprint {}, got {}", expected, actual)
            }
            RejectDetails::HostnameMismatch {
                expected_hostname,
                certificate_hostnames,
                ..
            } => format!(
                "hostname '{}' does not match certificate names: [{}]",
                expected_hostname,
                certificate_hostnames.join(", ")
            ),
            RejectDetails::SelfSigned { subject } => {
                format!("certificate ({}) is self-signed and not trusted", subject)
            }
            RejectDetails::Revoked {
                subject,
                serial,
                crl_reason,
            } => format!(
                "certificate ({}, serial {}) has been revoked (reason: {})",
                subject, serial, crl_reason
            ),
            RejectDetails::InsecureCipher { subject, message } => {
                format!("certificate ({}) {}", subject, message)
            }
            RejectDetails::LimitExceeded {
                chain_length,
                limit,
            } => format!(
                "certificate chain has {} certificates, limit is {}",
                chain_length, limit
            ),
        }
    }

    fn to_wire_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        let mut put = |k: &str, v: Value| {
            map.insert(k.to_string(), v);
        };
        match self {
            RejectDetails::Unknown { .. } => {}
            RejectDetails::Untrusted {
                subject,
                issuer,
                message,
            } => {
                put("subject", subject.as_str().into());
                put("issuer", issuer.as_str().into());
                put("message", message.as_str().into());
            }
            RejectDetails::Expired {
                subject,
                not_after,
                checked_at,
            } => {
                put("subject", subject.as_str().into());
                put("not-after", not_after.as_str().into());
                put("checked-at", checked_at.as_str().into());
            }
            RejectDetails::NotActivated {
                subject,
                not_before,
                checked_at,
            } => {
                put("subject", subject.as_str().into());
                put("not-before", not_before.as_str().into());
                put("checked-at", checked_at.as_str().into());
            }
            RejectDetails::FingerprintMismatch { expected, actual } => {
                put("expected-fingerprint", expected.as_str().into());
                put("actual-fingerprint", actual.as_str().into());
            }
            RejectDetails::HostnameMismatch {
                expected_hostname,
                reference_identities,
                certificate_hostnames,
            } => {
                put(EXPECTED_HOSTNAME, expected_hostname.as_str().into());
                put("reference-identities", reference_identities.clone().into());
                put(CERTIFICATE_HOSTNAMES, certificate_hostnames.clone().into());
            }
            RejectDetails::SelfSigned { subject } => {
                put("subject", subject.as_str().into());
            }
            RejectDetails::Revoked {
                subject,
                serial,
                crl_reason,
            } => {
                put("subject", subject.as_str().into());
                put("serial", serial.as_str().into());
                put("crl-reason", crl_reason.as_str().into());
            }
            RejectDetails::InsecureCipher { subject, message } => {
                put("subject", subject.as_str().into());
                put("message", message.as_str().into());
            }
            RejectDetails::LimitExceeded {
                chain_length,
                limit,
            } => {
                put("chain-length", (*chain_length as u64).into());
                put("limit", (*limit as u64).into());
            }
        }
        map.insert(DEBUG_MESSAGE.to_string(), self.debug_message().into());
        map
    }

    fn from_wire_map(reason: RejectReason, map: &BTreeMap<String, Value>) -> Option<Self> {
        let s = |k: &str| map.get(k).and_then(Value::as_str).map(str::to_string);
        let list = |k: &str| -> Option<Vec<String>> {
            map.get(k)?
                .as_array()?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect()
        };
        let n = |k: &str| map.get(k).and_then(Value::as_u64).map(|v| v as usize);
        let details = match reason {
            RejectReason::Unknown => RejectDetails::Unknown {
                message: s(DEBUG_MESSAGE)?,
            },
            RejectReason::Untrusted => RejectDetails::Untrusted {
                subject: s("subject")?,
                issuer: s("issuer")?,
                message: s("message").unwrap_or_default(),
            },
            RejectReason::Expired => RejectDetails::Expired {
                subject: s("subject")?,
                not_after: s("not-after")?,
                checked_at: s("checked-at")?,
            },
            RejectReason::NotActivated => RejectDetails::NotActivated {
                subject: s("subject")?,
                not_before: s("not-before")?,
                checked_at: s("checked-at")?,
            },
            RejectReason::FingerprintMismatch => RejectDetails::FingerprintMismatch {
                expected: s("expected-fingerprint")?,
                actual: s("actual-fingerprint")?,
            },
            RejectReason::HostnameMismatch => RejectDetails::HostnameMismatch {
                expected_hostname: s(EXPECTED_HOSTNAME)?,
                reference_identities: list("reference-identities").unwrap_or_default(),
                certificate_hostnames: list(CERTIFICATE_HOSTNAMES)?,
            },
            RejectReason::SelfSigned => RejectDetails::SelfSigned {
                subject: s("subject")?,
            },
            RejectReason::Revoked => RejectDetails::Revoked {
                subject: s("subject")?,
                serial: s("serial")?,
                crl_reason: s("crl-reason")?,
            },
            RejectReason::InsecureCipher => RejectDetails::InsecureCipher {
                subject: s("subject")?,
                message: s("message").unwrap_or_default(),
            },
            RejectReason::LimitExceeded => RejectDetails::LimitExceeded {
                chain_length: n("chain-length")?,
                limit: n("limit")?,
            },
        };
        Some(details)
    }
}

/// A rejection: structured details plus whether a human asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub details: RejectDetails,
    pub user_requested: bool,
}

impl Rejection {
    pub fn new(details: RejectDetails) -> Self {
        Rejection {
            details,
            user_requested: false,
        }
    }

    pub fn reason(&self) -> RejectReason {
        self.details.reason()
    }

    /// Copy of this rejection flagged as chosen by the user.
    pub fn user_requested(mut self) -> Self {
        self.user_requested = true;
        self
    }

    pub fn to_wire(&self) -> WireRejection {
        let mut details = self.details.to_wire_map();
        if self.user_requested {
            details.insert(USER_REQUESTED.to_string(), Value::Bool(true));
        }
        let reason = self.reason();
        WireRejection {
            reason: reason.code(),
            error: reason.error_name(),
            details,
        }
    }

    /// Decode a wire rejection. Maps missing the fields of their reason decode
    /// as `Unknown`, keeping whatever debug message was sent.
    pub fn from_wire(wire: &WireRejection) -> Self {
        let reason = RejectReason::from_code(wire.reason);
        let details = RejectDetails::from_wire_map(reason, &wire.details).unwrap_or_else(|| {
            RejectDetails::Unknown {
                message: wire
                    .details
                    .get(DEBUG_MESSAGE)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{} ({})", wire.error, wire.reason)),
            }
        });
        let user_requested = wire
            .details
            .get(USER_REQUESTED)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Rejection {
            details,
            user_requested,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.reason(), self.details.debug_message())
    }
}

/// Map-shaped rejection as carried by the transport: `(reason, error, details)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRejection {
    pub reason: u32,
    pub error: String,
    pub details: BTreeMap<String, Value>,
}
