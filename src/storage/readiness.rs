//! One-shot readiness signal for asynchronously initialized backends.
//!
//! The initializer resolves the signal exactly once, to ready or failed.
//! Waiters park on a `watch` channel instead of polling.

use tokio::sync::watch;

use super::QueueError;

/// Initialization state of a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Setup still running
    Pending,

    /// Backend can serve operations
    Ready,

    /// Setup failed; the backend will never become ready
    Failed(String),
}

/// Resolving side, consumed on use so it can only fire once
#[derive(Debug)]
pub struct ReadinessSetter {
    tx: watch::Sender<Readiness>,
}

/// Waiting side, cheap to clone
#[derive(Debug, Clone)]
pub struct ReadinessSignal {
    rx: watch::Receiver<Readiness>,
}

/// Create a pending signal
pub fn readiness() -> (ReadinessSetter, ReadinessSignal) {
    let (tx, rx) = watch::channel(Readiness::Pending);
    (ReadinessSetter { tx }, ReadinessSignal { rx })
}

impl ReadinessSetter {
    pub fn ready(self) {
        self.tx.send_replace(Readiness::Ready);
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.tx.send_replace(Readiness::Failed(reason.into()));
    }
}

impl ReadinessSignal {
    /// A signal that is already resolved as ready
    pub fn ready() -> Self {
        let (_tx, rx) = watch::channel(Readiness::Ready);
        Self { rx }
    }

    /// Current state without waiting
    pub fn state(&self) -> Readiness {
        self.rx.borrow().clone()
    }

    /// Suspend until the backend is ready.
    ///
    /// Fails fast with `BackendInit` once setup has failed, or if the setter
    /// was dropped without resolving.
    pub async fn wait(&self) -> Result<(), QueueError> {
        let mut rx = self.rx.clone();
        let outcome = rx
            .wait_for(|s| *s != Readiness::Pending)
            .await
            .map(|state| (*state).clone());

        let state = match outcome {
            Ok(state) => state,
            Err(_) => {
                // Sender gone; a final value may still have been published
                let last = rx.borrow().clone();
                if last == Readiness::Pending {
                    return Err(QueueError::BackendInit(
                        "initialization abandoned before completing".to_string(),
                    ));
                }
                last
            }
        };

        match state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(reason) => Err(QueueError::BackendInit(reason)),
            Readiness::Pending => Err(QueueError::BackendInit(
                "backend still initializing".to_string(),
            )),
        }
    }
}
