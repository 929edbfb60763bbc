//! Cooperative shutdown signal.

use tokio::sync::watch;

/// Trigger side of the shutdown signal
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request shutdown; every [`Shutdown`] observes it
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once shutdown has been requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another observer of this signal
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the shutdown signal.
///
/// Dropping every [`ShutdownHandle`] does not count as a request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a connected handle and observer
    #[must_use]
    pub fn channel() -> (ShutdownHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Self { rx })
    }

    /// An observer that never fires
    #[must_use]
    pub fn never() -> Self {
        Self::channel().1
    }

    /// Returns true once shutdown has been requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // All handles dropped without a request
                std::future::pending::<()>().await;
            }
        }
    }
}
