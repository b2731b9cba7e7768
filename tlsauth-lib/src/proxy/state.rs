use super::transport::FetchError;
use crate::verify::{Rejection, WireRejection};
use serde::Serialize;

/// Lifecycle of a remote certificate object.
///
/// Starts at `Pending` and moves exactly once to `Accepted` or `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "rejections", rename_all = "lowercase")]
pub enum CertificateState {
    Pending,
    Accepted,
    Rejected(Vec<Rejection>),
}

impl CertificateState {
    pub const PENDING: u32 = 0;
    pub const ACCEPTED: u32 = 1;
    pub const REJECTED: u32 = 2;

    /// Numeric code used on the wire.
    pub fn code(&self) -> u32 {
        match self {
            CertificateState::Pending => Self::PENDING,
            CertificateState::Accepted => Self::ACCEPTED,
            CertificateState::Rejected(_) => Self::REJECTED,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CertificateState::Pending => "pending",
            CertificateState::Accepted => "accepted",
            CertificateState::Rejected(_) => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CertificateState::Pending)
    }

    /// Decode the remote `State` and `Rejections` properties.
    pub fn from_remote(code: u32, rejections: &[WireRejection]) -> Result<Self, FetchError> {
        match code {
            Self::PENDING => Ok(CertificateState::Pending),
            Self::ACCEPTED => Ok(CertificateState::Accepted),
            Self::REJECTED => Ok(CertificateState::Rejected(
                rejections.iter().map(Rejection::from_wire).collect(),
            )),
            other => Err(FetchError::Malformed(format!(
                "unknown certificate state {}",
                other
            ))),
        }
    }
}
