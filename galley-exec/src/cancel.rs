use tokio::sync::watch;

/// A context-like cancellation token wired scheduler → cab runtime →
/// backend. Cloneable; all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// The cancelling end. Dropping it does not cancel; call `cancel()`.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // sender dropped without cancelling; wait forever
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A token that never cancels, for standalone cab runs.
pub fn never() -> CancelToken {
    let (tx, rx) = watch::channel(false);
    // leak the sender so the channel stays open
    std::mem::forget(tx);
    CancelToken { rx }
}
