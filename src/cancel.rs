use tokio::sync::watch;

/// Caller-held side of a cancellation pair. Dropping the source without
/// calling `cancel` leaves every token permanently un-cancelled.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Cheap clonable signal checked by long-running pipeline stages.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        // Receivers may all be gone already; nothing to signal then.
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that can never fire, for callers without a cancel path.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled. Safe to use in `select!`:
    /// if the source is dropped un-fired this future stays pending forever.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_fires_token() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());

        source.cancel();
        assert!(token.is_cancelled());
        // Must resolve immediately once fired.
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("cancelled() did not resolve");
    }

    #[tokio::test]
    async fn test_dropped_source_never_fires() {
        let source = CancelSource::new();
        let token = source.token();
        drop(source);

        assert!(!token.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(waited.is_err(), "token fired after source drop");
    }

    #[tokio::test]
    async fn test_clones_observe_cancel() {
        let source = CancelSource::new();
        let token = source.token();
        let clone = token.clone();
        source.cancel();
        assert!(clone.is_cancelled());
    }
}
