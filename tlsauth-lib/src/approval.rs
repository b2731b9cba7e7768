//! Routing a verification result to a decision.
//!
//! A chain that verifies (or matches a stored exception) is accepted without
//! asking anyone. Otherwise the user is prompted and the answer is applied to
//! the certificate proxy; "accept and remember" also stores an exception so
//! the next connection to the same host with the same certificate passes.

use crate::chain::CertificateChain;
use crate::fingerprint::Fingerprint;
use crate::idle::ActivityTracker;
use crate::proxy::{CertificateProxy, CertificateState, ProxyError};
use crate::verify::{Rejection, Verdict, VerificationContext, Verifier};
use crate::TlsAuthError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The user's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptOutcome {
    Accept,
    Reject,
    AcceptAndRemember,
}

/// Everything a prompt needs to explain the problem to the user.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub hostname: String,
    pub reference_identities: Vec<String>,
    pub chain: CertificateChain,
    pub fingerprint: Fingerprint,
    /// First failure in check order.
    pub primary: Rejection,
    /// Every failure, primary first.
    pub rejections: Vec<Rejection>,
}

impl ApprovalRequest {
    /// Headline shown above the details.
    pub fn summary(&self) -> String {
        format!(
            "This connection is untrusted. Would you like to continue anyway?\n\
             The identity provided by the chat server cannot be verified.\n{}",
            self.primary.reason().describe()
        )
    }
}

#[async_trait]
pub trait InteractivePrompt: Send + Sync {
    async fn ask(&self, request: &ApprovalRequest) -> Result<PromptOutcome, TlsAuthError>;
}

/// Stages of one approval attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowState {
    Start,
    Verifying,
    AutoAccepted,
    AwaitingUser,
    Accepted,
    Rejected,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowState::Accepted | FlowState::Rejected)
    }

    fn may_advance_to(self, next: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, next),
            (Start, Verifying)
                | (Verifying, AutoAccepted)
                | (Verifying, AwaitingUser)
                | (AutoAccepted | AwaitingUser, Accepted | Rejected)
        )
    }
}

/// State machine of one approval attempt, with its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalFlow {
    history: Vec<FlowState>,
}

impl Default for ApprovalFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalFlow {
    pub fn new() -> Self {
        ApprovalFlow {
            history: vec![FlowState::Start],
        }
    }

    pub fn state(&self) -> FlowState {
        self.history.last().copied().unwrap_or(FlowState::Start)
    }

    /// Every state visited, starting with `Start`.
    pub fn history(&self) -> &[FlowState] {
        &self.history
    }

    pub fn advance(&mut self, next: FlowState) -> Result<(), TlsAuthError> {
        let from = self.state();
        if !from.may_advance_to(next) {
            return Err(TlsAuthError::IllegalTransition { from, to: next });
        }
        debug!(?from, to = ?next, "approval flow advanced");
        self.history.push(next);
        Ok(())
    }
}

/// How an accepted certificate came to be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcceptedVia {
    /// Every automated check passed.
    Verification,
    /// A stored exception matched.
    Exception,
    /// The user accepted it once.
    User,
    /// The user accepted it and asked to remember the choice.
    UserRemembered,
    /// Another client of the certificate accepted it while the prompt was
    /// open.
    Elsewhere,
}

/// Final answer of an approval attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "detail", rename_all = "kebab-case")]
pub enum Decision {
    Accepted(AcceptedVia),
    Rejected(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted(_))
    }
}

/// Runs verification and approval for certificate proxies.
pub struct Authenticator {
    verifier: Arc<Verifier>,
    prompt: Option<Arc<dyn InteractivePrompt>>,
    activity: ActivityTracker,
}

impl Authenticator {
    /// A non-interactive authenticator: failures are rejected automatically.
    pub fn new(verifier: Arc<Verifier>) -> Self {
        Authenticator {
            verifier,
            prompt: None,
            activity: ActivityTracker::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn InteractivePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Share an activity tracker; each prompt holds a window open on it.
    pub fn with_activity(mut self, activity: ActivityTracker) -> Self {
        self.activity = activity;
        self
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Prepare, verify and decide on `proxy`.
    pub async fn authenticate(
        &self,
        proxy: &CertificateProxy,
        ctx: &VerificationContext,
    ) -> Result<Decision, TlsAuthError> {
        self.authenticate_with_flow(proxy, ctx, &mut ApprovalFlow::new())
            .await
    }

    /// Like [`Authenticator::authenticate`], recording each stage in `flow`.
    #[instrument(skip_all, fields(certificate = %proxy.name(), hostname = %ctx.hostname()))]
    pub async fn authenticate_with_flow(
        &self,
        proxy: &CertificateProxy,
        ctx: &VerificationContext,
        flow: &mut ApprovalFlow,
    ) -> Result<Decision, TlsAuthError> {
        proxy.prepare().await?;
        let attempt = proxy.begin_verification()?;
        flow.advance(FlowState::Verifying)?;

        let verdict = self.verifier.verify_attempt(&attempt, ctx)?;
        let (primary, secondary) = match verdict {
            Verdict::Trusted => {
                return auto_accept(proxy, flow, AcceptedVia::Verification).await;
            }
            Verdict::TrustedByException { .. } => {
                return auto_accept(proxy, flow, AcceptedVia::Exception).await;
            }
            Verdict::Rejected { primary, secondary } => (primary, secondary),
        };

        flow.advance(FlowState::AwaitingUser)?;
        let mut rejections = Vec::with_capacity(secondary.len() + 1);
        rejections.push(primary.clone());
        rejections.extend(secondary);

        let outcome = match &self.prompt {
            Some(prompt) => {
                let chain = proxy.chain()?;
                let request = ApprovalRequest {
                    hostname: ctx.hostname().to_string(),
                    reference_identities: ctx.reference_identities().to_vec(),
                    chain: chain.clone(),
                    fingerprint: self.verifier.fingerprint(chain),
                    primary: primary.clone(),
                    rejections: rejections.clone(),
                };
                let _window = self.activity.open_window();
                tokio::select! {
                    answer = prompt.ask(&request) => match answer {
                        Ok(outcome) => Some(outcome),
                        Err(e) => {
                            warn!(error = %e, "prompt failed; rejecting");
                            None
                        }
                    },
                    decided = decided_elsewhere(proxy) => {
                        info!(state = decided.name(), "decided by another client; prompt closed");
                        return finish_elsewhere(flow, decided, primary);
                    }
                }
            }
            None => None,
        };

        match outcome {
            None => {
                info!(reason = ?primary.reason(), "rejecting without user interaction");
                settle(proxy.reject(rejections).await)?;
                flow.advance(FlowState::Rejected)?;
                Ok(Decision::Rejected(primary))
            }
            Some(PromptOutcome::Reject) => {
                let flagged: Vec<_> = rejections
                    .into_iter()
                    .map(Rejection::user_requested)
                    .collect();
                settle(proxy.reject(flagged).await)?;
                flow.advance(FlowState::Rejected)?;
                Ok(Decision::Rejected(primary.user_requested()))
            }
            Some(PromptOutcome::Accept) => {
                settle(proxy.accept().await)?;
                flow.advance(FlowState::Accepted)?;
                Ok(Decision::Accepted(AcceptedVia::User))
            }
            Some(PromptOutcome::AcceptAndRemember) => {
                settle(proxy.accept().await)?;
                flow.advance(FlowState::Accepted)?;
                let fingerprint = self.verifier.fingerprint(proxy.chain()?);
                match self.verifier.exceptions().store(ctx.hostname(), &fingerprint) {
                    Ok(()) => Ok(Decision::Accepted(AcceptedVia::UserRemembered)),
                    Err(e) => {
                        warn!(
                            error = %e,
                            %fingerprint,
                            "accepted but the exception was not stored"
                        );
                        Ok(Decision::Accepted(AcceptedVia::User))
                    }
                }
            }
        }
    }
}

async fn auto_accept(
    proxy: &CertificateProxy,
    flow: &mut ApprovalFlow,
    via: AcceptedVia,
) -> Result<Decision, TlsAuthError> {
    flow.advance(FlowState::AutoAccepted)?;
    settle(proxy.accept().await)?;
    flow.advance(FlowState::Accepted)?;
    Ok(Decision::Accepted(via))
}

/// Resolves once another client decides the certificate. Never resolves for
/// a transport without signals.
async fn decided_elsewhere(proxy: &CertificateProxy) -> CertificateState {
    match proxy.follow_remote_signals().await {
        Some(state) => state,
        None => std::future::pending().await,
    }
}

fn finish_elsewhere(
    flow: &mut ApprovalFlow,
    decided: CertificateState,
    primary: Rejection,
) -> Result<Decision, TlsAuthError> {
    match decided {
        CertificateState::Rejected(rejections) => {
            flow.advance(FlowState::Rejected)?;
            Ok(Decision::Rejected(
                rejections.into_iter().next().unwrap_or(primary),
            ))
        }
        CertificateState::Accepted | CertificateState::Pending => {
            flow.advance(FlowState::Accepted)?;
            Ok(Decision::Accepted(AcceptedVia::Elsewhere))
        }
    }
}

/// Remote failures leave the local decision in place; anything else aborts.
fn settle(result: Result<(), ProxyError>) -> Result<(), TlsAuthError> {
    match result {
        Ok(()) => Ok(()),
        Err(ProxyError::Remote(e)) => {
            warn!(error = %e, "decision applied locally but the remote call failed");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("verifier", &self.verifier)
            .field("interactive", &self.prompt.is_some())
            .finish_non_exhaustive()
    }
}
