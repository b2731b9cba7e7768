//! Deferred process exit while prompt windows are open.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Counts open prompt windows.
///
/// Clones share the same count. [`ActivityTracker::run_until_idle`] resolves
/// once the count has stayed at zero for a whole timeout.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    open: Arc<watch::Sender<usize>>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        ActivityTracker { open: Arc::new(tx) }
    }

    /// Register an open window until the guard is dropped.
    pub fn open_window(&self) -> WindowGuard {
        self.open.send_modify(|n| *n += 1);
        debug!(open = *self.open.borrow(), "prompt window opened");
        WindowGuard {
            open: Arc::clone(&self.open),
        }
    }

    pub fn open_windows(&self) -> usize {
        *self.open.borrow()
    }

    /// Wait until no window has been open for `timeout`.
    ///
    /// The countdown pauses while a window is open and starts over when the
    /// last one closes.
    pub async fn run_until_idle(&self, timeout: Duration) {
        let mut rx = self.open.subscribe();
        loop {
            if rx.wait_for(|n| *n == 0).await.is_err() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if *rx.borrow() == 0 {
                        debug!("idle timeout reached");
                        return;
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// An open prompt window; closes on drop.
#[derive(Debug)]
pub struct WindowGuard {
    open: Arc<watch::Sender<usize>>,
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        self.open.send_modify(|n| *n = n.saturating_sub(1));
    }
}
