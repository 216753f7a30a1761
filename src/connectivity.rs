//! Connectivity observation.
//!
//! The content manager never asks a global for online state; it is handed a
//! `ConnectivityObserver` and subscribes to its transitions. Tests drive a
//! `ManualConnectivity`, the CLI uses a `ProbeConnectivity` that polls the
//! remote endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::remote::HttpRemote;

/// Source of online/offline state
pub trait ConnectivityObserver: Send + Sync {
    /// Whether we are online right now
    fn is_online(&self) -> bool;

    /// Receiver that observes every change of the online flag
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Online flag flipped by hand
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag; observers are only woken on an actual change
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn go_online(&self) {
        self.set_online(true);
    }

    pub fn go_offline(&self) {
        self.set_online(false);
    }
}

impl ConnectivityObserver for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Online flag kept current by periodically probing the remote endpoint.
///
/// Starts offline; the first probe runs immediately. Dropping it stops
/// probing.
pub struct ProbeConnectivity {
    state: ManualConnectivity,
    task: JoinHandle<()>,
}

impl ProbeConnectivity {
    /// Start probing `remote` every `interval`
    pub fn spawn(remote: HttpRemote, interval: Duration) -> Self {
        let state = ManualConnectivity::new(false);

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let online = remote.probe().await;
                if online != task_state.is_online() {
                    if online {
                        info!(endpoint = %remote.endpoint(), "Connection restored");
                    } else {
                        info!(endpoint = %remote.endpoint(), "Connection lost");
                    }
                    task_state.set_online(online);
                }
            }
        });

        Self { state, task }
    }
}

impl ConnectivityObserver for ProbeConnectivity {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.state.watch()
    }
}

impl Drop for ProbeConnectivity {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_transitions_wake_watchers() {
        let connectivity = ManualConnectivity::new(false);
        let mut rx = connectivity.watch();

        connectivity.go_online();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn test_setting_same_state_is_silent() {
        let connectivity = ManualConnectivity::new(true);
        let rx = connectivity.watch();

        connectivity.go_online();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_probe_against_unreachable_endpoint_stays_offline() {
        // Port 9 on localhost: nothing listens there in test environments
        let probe = ProbeConnectivity::spawn(
            HttpRemote::new("http://127.0.0.1:9/backend"),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!probe.is_online());
    }
}
