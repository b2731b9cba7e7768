//! Server certificate verification.
//!
//! A [`Verifier`] decides whether a presented chain can be trusted
//! automatically. It builds a certification path to an anchor in the
//! [`TrustStore`], checks validity dates, matches the expected hostname and
//! reference identities, and optionally checks revocation (CRLs) and key and
//! signature strength. Failures are reported as typed [`Rejection`]s; a
//! failing chain still verifies when the user previously stored an exception
//! for the (hostname, fingerprint) pair.

mod checks;
mod context;
pub mod crl;
mod helpers;
pub mod identity;
mod path;
mod reason;
mod trust_store;

use crate::chain::CertificateChain;
use crate::exceptions::ExceptionStore;
use crate::fingerprint::{DigestAlgorithm, Fingerprint};
use crate::proxy::{CertificateProxy, CertificateState, VerificationAttempt};
use crate::util;
use crate::TlsAuthError;
use checks::ChainView;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use x509_parser::prelude::*;

pub use context::VerificationContext;
pub use crl::{check_crl_revocation, load_crl_file, parse_pem_crl};
pub use path::MAX_PATH_DEPTH;
pub use reason::{
    RejectDetails, RejectReason, Rejection, WireRejection, CERTIFICATE_HOSTNAMES, DEBUG_MESSAGE,
    EXPECTED_HOSTNAME, USER_REQUESTED,
};
pub use trust_store::{find_system_ca_bundle, TrustStore};

/// A single verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Path to a trust anchor through CA certificates.
    Trust,
    /// notBefore / notAfter of every presented certificate.
    Validity,
    /// Expected hostname or a reference identity against the leaf.
    Hostname,
    /// Configured CRLs (skipped when none are configured).
    Revocation,
    /// Weak keys and signature algorithms.
    Strength,
}

impl CheckKind {
    pub const DEFAULT_ORDER: [CheckKind; 5] = [
        CheckKind::Trust,
        CheckKind::Validity,
        CheckKind::Hostname,
        CheckKind::Revocation,
        CheckKind::Strength,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckKind::Trust => "trust",
            CheckKind::Validity => "validity",
            CheckKind::Hostname => "hostname",
            CheckKind::Revocation => "revocation",
            CheckKind::Strength => "strength",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckKind {
    type Err = TlsAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckKind::DEFAULT_ORDER
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TlsAuthError::Config(format!("unknown check '{}'", s)))
    }
}

/// Options controlling verification behavior.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Whether to check certificate validity dates.
    pub check_time: bool,
    /// Verify at a specific Unix timestamp instead of the current time.
    pub at_time: Option<i64>,
    /// Accept a path ending at any anchored certificate, not just a
    /// self-signed root. Matches OpenSSL's `-partial_chain`.
    pub partial_chain: bool,
    /// Longest chain accepted for verification.
    pub max_chain_depth: usize,
    /// DER-encoded CRLs. Revocation is only checked when non-empty.
    pub crl_ders: Vec<Vec<u8>>,
    /// Reject weak keys and signature algorithms.
    pub check_strength: bool,
    /// Run every check and report all failures instead of stopping at the
    /// first one.
    pub composite: bool,
    /// Order the checks run in.
    pub order: Vec<CheckKind>,
    /// Digest used for the exception fingerprint.
    pub fingerprint_digest: DigestAlgorithm,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_time: true,
            at_time: None,
            partial_chain: false,
            max_chain_depth: MAX_PATH_DEPTH,
            crl_ders: Vec::new(),
            check_strength: true,
            composite: false,
            order: CheckKind::DEFAULT_ORDER.to_vec(),
            fingerprint_digest: DigestAlgorithm::default(),
        }
    }
}

/// Outcome of verifying a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum Verdict {
    /// Every check passed.
    Trusted,
    /// Checks failed but the user stored an exception for this certificate.
    TrustedByException { fingerprint: Fingerprint },
    /// Checks failed; `primary` is the first failure in check order.
    Rejected {
        primary: Rejection,
        secondary: Vec<Rejection>,
    },
}

impl Verdict {
    fn from_failures(mut failures: Vec<Rejection>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        let primary = failures.remove(0);
        Some(Verdict::Rejected {
            primary,
            secondary: failures,
        })
    }

    pub fn is_trusted(&self) -> bool {
        !matches!(self, Verdict::Rejected { .. })
    }

    /// All rejections, primary first. Empty for trusted verdicts.
    pub fn rejections(&self) -> Vec<Rejection> {
        match self {
            Verdict::Rejected { primary, secondary } => std::iter::once(primary)
                .chain(secondary)
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Runs the trust decision for certificate chains.
///
/// Cheap to share: the trust store and exception store are reference counted
/// and read-only during verification.
pub struct Verifier {
    trust_store: Arc<TrustStore>,
    exceptions: Arc<dyn ExceptionStore>,
    options: VerifyOptions,
}

impl Verifier {
    pub fn new(trust_store: Arc<TrustStore>, exceptions: Arc<dyn ExceptionStore>) -> Self {
        Verifier {
            trust_store,
            exceptions,
            options: VerifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }

    pub fn exceptions(&self) -> &Arc<dyn ExceptionStore> {
        &self.exceptions
    }

    /// Fingerprint used to key exceptions for this chain.
    pub fn fingerprint(&self, chain: &CertificateChain) -> Fingerprint {
        chain.fingerprint(self.options.fingerprint_digest)
    }

    /// Run the configured checks and return every failure found, in check
    /// order. Exceptions are not consulted.
    pub fn check_chain(
        &self,
        chain: &CertificateChain,
        ctx: &VerificationContext,
    ) -> Vec<Rejection> {
        let leaf = match X509Certificate::from_der(chain.leaf()) {
            Ok((_, leaf)) => leaf,
            Err(e) => {
                return vec![Rejection::new(RejectDetails::Unknown {
                    message: format!("failed to parse leaf certificate: {}", e),
                })];
            }
        };

        if chain.len() > self.options.max_chain_depth {
            return vec![Rejection::new(RejectDetails::LimitExceeded {
                chain_length: chain.len(),
                limit: self.options.max_chain_depth,
            })];
        }

        let mut intermediates = Vec::with_capacity(chain.len().saturating_sub(1));
        for (idx, der) in chain.intermediates().iter().enumerate() {
            match X509Certificate::from_der(der) {
                Ok((_, cert)) => intermediates.push((der.clone(), cert)),
                Err(e) => debug!(depth = idx + 1, error = %e, "ignoring unparsable intermediate"),
            }
        }

        let path = path::build_path(
            chain.leaf(),
            &intermediates,
            &self.trust_store,
            self.options.partial_chain,
        );
        let view = ChainView {
            leaf,
            path,
            presented: chain.len(),
        };
        let now_ts = self.options.at_time.unwrap_or_else(util::now_timestamp);

        let mut failures = Vec::new();
        for kind in &self.options.order {
            let found = match kind {
                CheckKind::Trust => checks::check_trust(&view),
                CheckKind::Validity if self.options.check_time => {
                    checks::check_validity(&view, now_ts)
                }
                CheckKind::Validity => None,
                CheckKind::Hostname => checks::check_hostname(&view, ctx),
                CheckKind::Revocation if !self.options.crl_ders.is_empty() => {
                    checks::check_revocation(&view, &self.options.crl_ders, now_ts)
                }
                CheckKind::Revocation => None,
                CheckKind::Strength if self.options.check_strength => {
                    checks::check_strength(&view)
                }
                CheckKind::Strength => None,
            };
            if let Some(details) = found {
                debug!(check = %kind, reason = ?details.reason(), "check failed");
                failures.push(Rejection::new(details));
                if !self.options.composite {
                    break;
                }
            }
        }
        failures
    }

    /// Verify a chain, falling back to the exception store on failure.
    #[instrument(skip_all, fields(hostname = %ctx.hostname()))]
    pub fn verify_chain(&self, chain: &CertificateChain, ctx: &VerificationContext) -> Verdict {
        let Some(verdict) = Verdict::from_failures(self.check_chain(chain, ctx)) else {
            debug!("chain verified");
            return Verdict::Trusted;
        };

        let fingerprint = self.fingerprint(chain);
        match self.exceptions.lookup(ctx.hostname(), &fingerprint) {
            Ok(true) => {
                info!(%fingerprint, "certificate trusted by stored exception");
                Verdict::TrustedByException { fingerprint }
            }
            Ok(false) => verdict,
            Err(e) => {
                warn!(error = %e, "exception lookup failed; treating as no exception");
                verdict
            }
        }
    }

    /// Verify the chain held by a prepared, pending proxy.
    ///
    /// Fails with [`TlsAuthError::VerificationInProgress`] while another
    /// verification of the same proxy is running.
    pub fn verify_certificate(
        &self,
        proxy: &CertificateProxy,
        ctx: &VerificationContext,
    ) -> Result<Verdict, TlsAuthError> {
        let attempt = proxy.begin_verification()?;
        self.verify_attempt(&attempt, ctx)
    }

    /// Verify within an attempt the caller already holds.
    pub fn verify_attempt(
        &self,
        attempt: &VerificationAttempt<'_>,
        ctx: &VerificationContext,
    ) -> Result<Verdict, TlsAuthError> {
        let proxy = attempt.proxy();
        let chain = proxy.chain()?;
        let state = proxy.state()?;
        if !matches!(state, CertificateState::Pending) {
            return Err(TlsAuthError::NotPending(state.name()));
        }

        let cert_type = proxy.certificate_type()?;
        if !cert_type.eq_ignore_ascii_case("x509") {
            warn!(certificate_type = %cert_type, "unsupported certificate type");
            return Ok(Verdict::Rejected {
                primary: Rejection::new(RejectDetails::Unknown {
                    message: format!("unsupported certificate type '{}'", cert_type),
                }),
                secondary: Vec::new(),
            });
        }

        Ok(self.verify_chain(chain, ctx))
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("trust_store", &self.trust_store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
