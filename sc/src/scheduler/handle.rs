//! SupercomponentHandle - control and diagnostics for a running scheduler

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::status::StatusSnapshot;

/// Cloneable handle to a scheduler loop
///
/// Stopping is cooperative: the loop finishes any wait in progress, tells
/// every tracked module to stop and then ends.
#[derive(Debug, Clone)]
pub struct SupercomponentHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl SupercomponentHandle {
    pub(crate) fn new(stop_tx: Arc<watch::Sender<bool>>, status_rx: watch::Receiver<StatusSnapshot>) -> Self {
        debug!("SupercomponentHandle::new: called");
        Self { stop_tx, status_rx }
    }

    /// Request a stop
    pub fn stop(&self) {
        debug!("SupercomponentHandle::stop: called");
        self.stop_tx.send_replace(true);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Latest published snapshot
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Wait until a published snapshot satisfies `f`
    ///
    /// Returns `None` if the scheduler ended first.
    pub async fn wait_for(&self, f: impl FnMut(&StatusSnapshot) -> bool) -> Option<StatusSnapshot> {
        let mut rx = self.status_rx.clone();
        let snapshot = rx.wait_for(f).await.ok()?.clone();
        Some(snapshot)
    }
}
