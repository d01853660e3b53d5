//! Progress reporting.
//!
//! Observers are passed explicitly to each transfer. A
//! `tokio::sync::watch::Sender` is an observer, so any number of tasks can
//! subscribe to the latest progress without slowing the transfer down.

use depot_core::UploadPhase;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of a running transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: Option<u64>,
    pub chunks: u64,
}

impl TransferProgress {
    /// Completed fraction, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.transferred as f64 / total as f64),
            None => None,
        }
    }
}

/// Receives progress updates from the pipeline and upload manager.
pub trait ProgressObserver: Send + Sync {
    /// Called after every chunk the sink accepts.
    fn on_progress(&self, progress: &TransferProgress);

    /// Called when an upload changes phase.
    fn on_phase(&self, _phase: &UploadPhase) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _progress: &TransferProgress) {}
}

impl ProgressObserver for watch::Sender<TransferProgress> {
    fn on_progress(&self, progress: &TransferProgress) {
        self.send_replace(*progress);
    }
}

/// Adapts a closure into an observer.
pub struct FnObserver<F>(pub F);

impl<F> ProgressObserver for FnObserver<F>
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &TransferProgress) {
        (self.0)(progress)
    }
}

/// Create a watch-backed observer and a receiver for it.
pub fn progress_channel() -> (Arc<dyn ProgressObserver>, watch::Receiver<TransferProgress>) {
    let (tx, rx) = watch::channel(TransferProgress::default());
    (Arc::new(tx), rx)
}

/// The shared no-op observer.
pub fn noop() -> Arc<dyn ProgressObserver> {
    Arc::new(NoopObserver)
}
