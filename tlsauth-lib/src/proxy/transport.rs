//! The remote side of a certificate proxy.
//!
//! [`CertificateTransport`] is the seam to whatever holds the certificate
//! (a connection manager over IPC in a real client). [`LocalCertificate`] is
//! the in-process implementation used by the CLI and the tests.

use crate::chain::CertificateChain;
use crate::verify::WireRejection;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Failure while fetching the certificate object's properties.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("certificate object unreachable: {0}")]
    Unreachable(String),

    #[error("malformed certificate object: {0}")]
    Malformed(String),
}

/// A remote `Accept`/`Reject` call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("remote call failed: {0}")]
pub struct RemoteError(pub String);

/// Property snapshot of the remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProperties {
    pub state: u32,
    pub rejections: Vec<WireRejection>,
    pub certificate_type: String,
    pub chain_data: Vec<Vec<u8>>,
}

/// State change broadcast by the remote object.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteSignal {
    Accepted,
    Rejected(Vec<WireRejection>),
}

#[async_trait]
pub trait CertificateTransport: Send + Sync {
    /// Fetch `State`, `Rejections`, `CertificateType` and
    /// `CertificateChainData` in one call.
    async fn properties(&self) -> Result<RemoteProperties, FetchError>;

    async fn accept(&self) -> Result<(), RemoteError>;

    async fn reject(&self, rejections: &[WireRejection]) -> Result<(), RemoteError>;

    /// Subscribe to state-change signals, if the transport emits them.
    fn signals(&self) -> Option<broadcast::Receiver<RemoteSignal>> {
        None
    }
}

struct LocalInner {
    props: RemoteProperties,
    unreachable: Option<String>,
    fail_calls: Option<String>,
}

/// In-process certificate object.
///
/// Behaves like a connection manager's object: mutations of a non-pending
/// object fail, and every state change is broadcast. Call counters and
/// failure injection make it usable as a test double.
pub struct LocalCertificate {
    inner: Mutex<LocalInner>,
    signals: broadcast::Sender<RemoteSignal>,
    fetch_delay: Option<Duration>,
    properties_calls: AtomicUsize,
    accept_calls: AtomicUsize,
    reject_calls: AtomicUsize,
}

impl LocalCertificate {
    /// A pending X.509 certificate object holding `chain`.
    pub fn new(chain: &CertificateChain) -> Self {
        Self::from_properties(RemoteProperties {
            state: 0,
            rejections: Vec::new(),
            certificate_type: "x509".into(),
            chain_data: chain.certs().to_vec(),
        })
    }

    /// An object with arbitrary (possibly malformed) properties.
    pub fn from_properties(props: RemoteProperties) -> Self {
        let (signals, _) = broadcast::channel(16);
        LocalCertificate {
            inner: Mutex::new(LocalInner {
                props,
                unreachable: None,
                fail_calls: None,
            }),
            signals,
            fetch_delay: None,
            properties_calls: AtomicUsize::new(0),
            accept_calls: AtomicUsize::new(0),
            reject_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every property fetch, so concurrent fetches overlap.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Make property fetches fail (`Some`) or succeed again (`None`).
    pub fn set_unreachable(&self, message: Option<&str>) {
        self.lock().unreachable = message.map(str::to_string);
    }

    /// Make `accept`/`reject` fail after being counted.
    pub fn fail_remote_calls(&self, message: Option<&str>) {
        self.lock().fail_calls = message.map(str::to_string);
    }

    pub fn state_code(&self) -> u32 {
        self.lock().props.state
    }

    pub fn rejections(&self) -> Vec<WireRejection> {
        self.lock().props.rejections.clone()
    }

    pub fn properties_calls(&self) -> usize {
        self.properties_calls.load(Ordering::SeqCst)
    }

    pub fn accept_calls(&self) -> usize {
        self.accept_calls.load(Ordering::SeqCst)
    }

    pub fn reject_calls(&self) -> usize {
        self.reject_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate(&self, state: u32, rejections: &[WireRejection]) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if let Some(msg) = &inner.fail_calls {
            return Err(RemoteError(msg.clone()));
        }
        if inner.props.state != 0 {
            return Err(RemoteError(format!(
                "certificate is not pending (state {})",
                inner.props.state
            )));
        }
        inner.props.state = state;
        inner.props.rejections = rejections.to_vec();
        Ok(())
    }
}

#[async_trait]
impl CertificateTransport for LocalCertificate {
    async fn properties(&self) -> Result<RemoteProperties, FetchError> {
        self.properties_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.lock();
        match &inner.unreachable {
            Some(msg) => Err(FetchError::Unreachable(msg.clone())),
            None => Ok(inner.props.clone()),
        }
    }

    async fn accept(&self) -> Result<(), RemoteError> {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        self.mutate(1, &[])?;
        debug!("local certificate accepted");
        let _ = self.signals.send(RemoteSignal::Accepted);
        Ok(())
    }

    async fn reject(&self, rejections: &[WireRejection]) -> Result<(), RemoteError> {
        self.reject_calls.fetch_add(1, Ordering::SeqCst);
        self.mutate(2, rejections)?;
        debug!(count = rejections.len(), "local certificate rejected");
        let _ = self.signals.send(RemoteSignal::Rejected(rejections.to_vec()));
        Ok(())
    }

    fn signals(&self) -> Option<broadcast::Receiver<RemoteSignal>> {
        Some(self.signals.subscribe())
    }
}
