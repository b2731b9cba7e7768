//! tlsauth-lib: TLS server-certificate verification and approval.
//!
//! A connection manager holds a server's certificate chain remotely and asks
//! the client to decide whether to trust it. This crate provides the three
//! pieces of that decision:
//!
//! - [`CertificateProxy`]: local view of the remote certificate object
//!   (state, chain bytes, accept/reject calls, state-change observers).
//! - [`Verifier`]: chain of trust, validity window, hostname and optional
//!   revocation and strength checks, with a typed [`Rejection`] on failure.
//! - [`Authenticator`]: routes a failed verification to an interactive
//!   prompt and applies the user's answer, persisting exceptions in an
//!   [`ExceptionStore`].

pub mod approval;
pub mod chain;
pub mod config;
pub mod exceptions;
pub mod fingerprint;
pub mod idle;
mod oid;
pub mod proxy;
pub mod util;
pub mod verify;

pub use approval::{
    AcceptedVia, ApprovalFlow, ApprovalRequest, Authenticator, Decision, FlowState,
    InteractivePrompt, PromptOutcome,
};
pub use chain::{der_to_pem, parse_pem_chain, CertificateChain};
pub use config::Config;
pub use exceptions::{ExceptionEntry, ExceptionStore, FileExceptionStore, MemoryExceptionStore};
pub use fingerprint::{compute_fingerprint, DigestAlgorithm, Fingerprint};
pub use idle::{ActivityTracker, WindowGuard};
pub use proxy::{
    CertificateProxy, CertificateState, CertificateTransport, FetchError, LocalCertificate,
    ObserverId, ProxyError, RemoteError, RemoteProperties, RemoteSignal,
};
pub use verify::{
    CheckKind, RejectDetails, RejectReason, Rejection, TrustStore, VerificationContext, Verdict,
    Verifier, VerifyOptions, WireRejection,
};

/// Errors returned by tlsauth-lib.
#[derive(Debug, thiserror::Error)]
pub enum TlsAuthError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(String),

    #[error("Invalid PEM format: {0}")]
    PemError(String),

    #[error("Invalid DER format: {0}")]
    DerError(String),

    #[error("Verification error: {0}")]
    VerifyError(String),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("a verification of this certificate is already in progress")]
    VerificationInProgress,

    #[error("certificate is not pending (state: {0})")]
    NotPending(&'static str),

    #[error("exception store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("illegal approval transition {from:?} -> {to:?}")]
    IllegalTransition { from: FlowState, to: FlowState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<FetchError> for TlsAuthError {
    fn from(err: FetchError) -> Self {
        TlsAuthError::Proxy(ProxyError::Fetch(err))
    }
}
