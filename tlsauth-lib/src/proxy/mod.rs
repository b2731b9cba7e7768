//! Local proxy for a remotely-held certificate.
//!
//! [`CertificateProxy::prepare`] fetches the remote properties once; after
//! that the proxy serves the chain and state locally. `accept` and `reject`
//! update the local state first, notify observers, then forward the call to
//! the remote object.

mod state;
mod transport;

pub use state::CertificateState;
pub use transport::{
    CertificateTransport, FetchError, LocalCertificate, RemoteError, RemoteProperties,
    RemoteSignal,
};

use crate::chain::CertificateChain;
use crate::verify::Rejection;
use crate::TlsAuthError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

/// Failure of a proxy operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("certificate proxy is not prepared")]
    NotPrepared,

    #[error("certificate is already {state}")]
    InvalidState { state: &'static str },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Handle returned by [`CertificateProxy::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&CertificateState) + Send + Sync>;

#[derive(Debug)]
struct Prepared {
    chain: CertificateChain,
    certificate_type: String,
}

enum FetchSlot {
    Idle,
    Fetching(watch::Receiver<Option<Result<(), FetchError>>>),
    Ready,
}

/// Resets an abandoned fetch so a later `prepare` can retry.
struct FetchReset<'a> {
    slot: &'a Mutex<FetchSlot>,
    armed: bool,
}

impl Drop for FetchReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            *lock(self.slot) = FetchSlot::Idle;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Local representation of a remote certificate object.
pub struct CertificateProxy {
    transport: Arc<dyn CertificateTransport>,
    name: String,
    fetch: Mutex<FetchSlot>,
    prepared: OnceLock<Prepared>,
    state: Mutex<Option<CertificateState>>,
    state_tx: watch::Sender<Option<CertificateState>>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
    verifying: AtomicBool,
}

impl CertificateProxy {
    /// Wrap a transport. `name` identifies the object in logs.
    pub fn new(transport: Arc<dyn CertificateTransport>, name: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(None);
        CertificateProxy {
            transport,
            name: name.into(),
            fetch: Mutex::new(FetchSlot::Idle),
            prepared: OnceLock::new(),
            state: Mutex::new(None),
            state_tx,
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            verifying: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the remote properties.
    ///
    /// Concurrent callers join the outstanding fetch and all see its result;
    /// once prepared, calls return immediately. A failed fetch may be
    /// retried by a later call.
    #[instrument(skip(self), fields(certificate = %self.name))]
    pub async fn prepare(&self) -> Result<(), FetchError> {
        let (leader, mut waiter) = {
            let mut slot = lock(&self.fetch);
            let joined = match &*slot {
                FetchSlot::Ready => return Ok(()),
                FetchSlot::Fetching(rx) => Some(rx.clone()),
                FetchSlot::Idle => None,
            };
            match joined {
                Some(rx) => (None, rx),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = FetchSlot::Fetching(rx.clone());
                    (Some(tx), rx)
                }
            }
        };
        if let Some(tx) = leader {
            return self.fetch_properties(tx).await;
        }

        debug!("joining outstanding fetch");
        let outcome = match waiter.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(FetchError::Unreachable(
                "fetch was abandoned before completing".into(),
            ))
        })
    }

    async fn fetch_properties(
        &self,
        tx: watch::Sender<Option<Result<(), FetchError>>>,
    ) -> Result<(), FetchError> {
        let mut reset = FetchReset {
            slot: &self.fetch,
            armed: true,
        };

        let result = match self.transport.properties().await {
            Ok(props) => self.install(props),
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                *lock(&self.fetch) = FetchSlot::Ready;
                reset.armed = false;
                debug!("certificate prepared");
            }
            Err(e) => warn!(error = %e, "failed to prepare certificate"),
        }
        drop(reset);
        let _ = tx.send(Some(result.clone()));
        result
    }

    fn install(&self, props: transport::RemoteProperties) -> Result<(), FetchError> {
        let state = CertificateState::from_remote(props.state, &props.rejections)?;
        if props.certificate_type.trim().is_empty() {
            return Err(FetchError::Malformed("empty certificate type".into()));
        }
        let chain = CertificateChain::from_der_list(props.chain_data)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let _ = self.prepared.set(Prepared {
            chain,
            certificate_type: props.certificate_type,
        });
        *lock(&self.state) = Some(state.clone());
        self.state_tx.send_replace(Some(state));
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.get().is_some()
    }

    fn prepared(&self) -> Result<&Prepared, ProxyError> {
        self.prepared.get().ok_or(ProxyError::NotPrepared)
    }

    pub fn chain(&self) -> Result<&CertificateChain, ProxyError> {
        Ok(&self.prepared()?.chain)
    }

    pub fn certificate_type(&self) -> Result<&str, ProxyError> {
        Ok(&self.prepared()?.certificate_type)
    }

    pub fn state(&self) -> Result<CertificateState, ProxyError> {
        lock(&self.state).clone().ok_or(ProxyError::NotPrepared)
    }

    /// Accept the certificate.
    ///
    /// The local state becomes `Accepted` before the remote call; a remote
    /// failure is returned as [`ProxyError::Remote`] without undoing it.
    #[instrument(skip(self), fields(certificate = %self.name))]
    pub async fn accept(&self) -> Result<(), ProxyError> {
        self.transition(CertificateState::Accepted)?;
        info!("certificate accepted");
        self.transport.accept().await.map_err(|e| {
            warn!(error = %e, "remote accept failed");
            ProxyError::Remote(e)
        })
    }

    /// Reject the certificate with the given rejections.
    ///
    /// An empty list is sent as a single `Unknown` rejection.
    #[instrument(skip_all, fields(certificate = %self.name))]
    pub async fn reject(&self, rejections: Vec<Rejection>) -> Result<(), ProxyError> {
        let rejections = if rejections.is_empty() {
            vec![Rejection::new(crate::verify::RejectDetails::Unknown {
                message: "rejected without a reason".into(),
            })]
        } else {
            rejections
        };
        let wire: Vec<_> = rejections.iter().map(Rejection::to_wire).collect();
        self.transition(CertificateState::Rejected(rejections))?;
        info!(count = wire.len(), "certificate rejected");
        self.transport.reject(&wire).await.map_err(|e| {
            warn!(error = %e, "remote reject failed");
            ProxyError::Remote(e)
        })
    }

    /// Apply a state change initiated by another client of the remote
    /// object. Ignored once the local state is terminal.
    pub fn handle_remote_signal(&self, signal: RemoteSignal) {
        let next = match signal {
            RemoteSignal::Accepted => CertificateState::Accepted,
            RemoteSignal::Rejected(wire) => {
                CertificateState::Rejected(wire.iter().map(Rejection::from_wire).collect())
            }
        };
        let current = lock(&self.state).clone();
        match current {
            Some(CertificateState::Pending) => {
                if self.transition(next).is_ok() {
                    info!(certificate = %self.name, "state changed remotely");
                }
            }
            Some(cur) if cur.code() == next.code() => {
                debug!(certificate = %self.name, state = cur.name(), "ignoring echoed signal");
            }
            Some(cur) => warn!(
                certificate = %self.name,
                state = cur.name(),
                signal = next.name(),
                "ignoring signal for a decided certificate"
            ),
            None => warn!(certificate = %self.name, "ignoring signal before prepare"),
        }
    }

    /// Apply remote signals until the certificate is decided, returning the
    /// terminal state. `None` when the transport sends no signals or stops
    /// sending them first.
    pub async fn follow_remote_signals(&self) -> Option<CertificateState> {
        let mut rx = self.transport.signals()?;
        loop {
            if let Ok(state) = self.state() {
                if state.is_terminal() {
                    return Some(state);
                }
            }
            match rx.recv().await {
                Ok(signal) => self.handle_remote_signal(signal),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(certificate = %self.name, skipped = n, "missed remote signals");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn transition(&self, next: CertificateState) -> Result<(), ProxyError> {
        let observers = {
            let mut state = lock(&self.state);
            match &*state {
                None => return Err(ProxyError::NotPrepared),
                Some(CertificateState::Pending) => {}
                Some(current) => {
                    error!(
                        certificate = %self.name,
                        state = current.name(),
                        requested = next.name(),
                        "state change requested for a decided certificate"
                    );
                    return Err(ProxyError::InvalidState {
                        state: current.name(),
                    });
                }
            }
            *state = Some(next.clone());
            lock(&self.observers)
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect::<Vec<_>>()
        };

        self.state_tx.send_replace(Some(next.clone()));
        for observer in observers {
            observer(&next);
        }
        Ok(())
    }

    /// Register a callback invoked once per state transition.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&CertificateState) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        lock(&self.observers).push((id, Arc::new(callback)));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Wait until the certificate is accepted or rejected.
    pub async fn wait_for_decision(&self) -> CertificateState {
        let mut rx = self.state_tx.subscribe();
        let decided = rx
            .wait_for(|s| s.as_ref().is_some_and(CertificateState::is_terminal))
            .await
            .ok()
            .and_then(|s| (*s).clone());
        match decided {
            Some(state) => state,
            // The sender lives as long as `self`.
            None => self.state().unwrap_or(CertificateState::Pending),
        }
    }

    /// Start a verification attempt; only one may be in flight.
    pub fn begin_verification(&self) -> Result<VerificationAttempt<'_>, TlsAuthError> {
        if self
            .verifying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TlsAuthError::VerificationInProgress);
        }
        Ok(VerificationAttempt { proxy: self })
    }
}

impl std::fmt::Debug for CertificateProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateProxy")
            .field("name", &self.name)
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

/// Exclusive verification of one proxy; released on drop.
#[derive(Debug)]
pub struct VerificationAttempt<'a> {
    proxy: &'a CertificateProxy,
}

impl<'a> VerificationAttempt<'a> {
    pub fn proxy(&self) -> &'a CertificateProxy {
        self.proxy
    }
}

impl Drop for VerificationAttempt<'_> {
    fn drop(&mut self) {
        self.proxy.verifying.store(false, Ordering::Release);
    }
}
