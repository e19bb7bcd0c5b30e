// src/exec/cancellation.rs

use tokio::sync::watch;

/// Shared cancellation signal.
///
/// Cloning yields another handle to the same signal. Once cancelled it stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancellationContext {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationContext {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so `wait_for` only fails if it is dropped.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_observe_cancellation() {
        let ctx = CancellationContext::new();
        let other = ctx.clone();
        assert!(!other.is_cancelled());

        ctx.cancel();
        assert!(other.is_cancelled());
        other.cancelled().await;
    }
}
