use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Auto-reset event shared between a signalling side (device callback,
/// command producers) and a single waiting worker.
///
/// Signals coalesce: any number of `signal` calls before a wait wake it once.
#[derive(Debug, Clone)]
pub struct AudioEvent {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl AudioEvent {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub fn signal(&self) {
        // A full slot means the event is already set.
        let _ = self.tx.try_send(());
    }

    /// Wait for the event, consuming the signal. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending signal without blocking.
    pub fn try_wait(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Receiver for use in `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for AudioEvent {
    fn default() -> Self {
        Self::new()
    }
}
