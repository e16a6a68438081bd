//! Stop primitive for the transport engine.

use tokio::sync::broadcast;

/// Broadcast-based stop signal.
///
/// The engine's accept loop holds a receiver; triggering makes the serve
/// loop return, which in turn lets the supervisor thread exit. This is
/// the only whole-server stop mechanism; there is no per-connection
/// cancellation.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the stop signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the stop signal. Harmless if nothing is listening.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
