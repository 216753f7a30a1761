//! Content manager: remote-confirmed list plus a durable pending queue.
//!
//! Lifecycle per content type:
//!
//! ```text
//! new() ──► download confirmed list ──► steady state
//!   │                                      ▲
//!   └─ online? drain ──────────────────────┤
//!        add() + online ──► drain ─────────┤
//!        offline → online ──► drain ───────┘
//! ```
//!
//! A drain reads the pending set once and uploads records one at a time,
//! in queue order. An uploaded record is removed from the queue before its
//! confirmed copy is appended to the list, so no observer ever sees it in
//! both. The first failed upload ends the drain; it and everything behind it
//! stay queued for the next trigger.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::connectivity::ConnectivityObserver;
use crate::domain::{Item, ItemId};
use crate::remote::{RemoteError, RemoteStore};
use crate::storage::{DurableQueue, QueueError};

type Subscriber = Arc<dyn Fn() + Send + Sync>;

/// Outcome of one drain of the pending queue
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Records pending when the drain started
    pub attempted: usize,

    /// Records confirmed and moved to the list
    pub uploaded: usize,

    /// Upload failure that ended the drain early
    pub failure: Option<RemoteError>,
}

impl DrainReport {
    /// Records left behind by this drain
    pub fn remaining(&self) -> usize {
        self.attempted - self.uploaded
    }

    /// Whether every pending record was uploaded
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.uploaded == self.attempted
    }
}

/// State shared between the manager handle and its background tasks
struct Shared {
    content_type: String,
    queue: DurableQueue,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn ConnectivityObserver>,

    /// Confirmed items, in confirmation order
    list: RwLock<Vec<Item>>,

    subscribers: Mutex<Vec<Subscriber>>,

    /// Held for the whole of a drain
    drain_lock: tokio::sync::Mutex<()>,

    /// Flips to true once the initial download attempt is over
    loaded: watch::Sender<bool>,
}

/// Orchestrates sync for one content type
pub struct ContentManager {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl ContentManager {
    /// Create a manager and start syncing.
    ///
    /// Must be called from within a Tokio runtime. Kicks off the download of
    /// confirmed items, a drain if currently online, and a listener that
    /// drains again whenever connectivity comes back.
    pub fn new(
        content_type: impl Into<String>,
        queue: DurableQueue,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Self {
        let (loaded, _) = watch::channel(false);
        let mut online_rx = connectivity.watch();

        let shared = Arc::new(Shared {
            content_type: content_type.into(),
            queue,
            remote,
            connectivity,
            list: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            loaded,
        });

        info!(
            content_type = %shared.content_type,
            backend = %shared.queue.backend(),
            "Starting content manager"
        );

        let download = Arc::clone(&shared);
        tokio::spawn(async move {
            let _ = download.download().await;
            download.loaded.send_replace(true);
        });

        let online = *online_rx.borrow_and_update();
        if online {
            Shared::spawn_drain(&shared);
        }

        let listener = tokio::spawn(listen_for_reconnect(Arc::downgrade(&shared), online_rx));

        Self { shared, listener }
    }

    pub fn content_type(&self) -> &str {
        &self.shared.content_type
    }

    /// The pending queue backing this manager
    pub fn queue(&self) -> &DurableQueue {
        &self.shared.queue
    }

    /// Snapshot of the confirmed items
    pub fn list(&self) -> Vec<Item> {
        self.shared
            .list
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records still waiting for upload
    pub async fn pending(&self) -> Result<Vec<Item>, QueueError> {
        self.shared.queue.get_all().await
    }

    /// Queue an item for upload.
    ///
    /// Returns once the item is durably queued; if online, a drain is started
    /// in the background.
    pub async fn add(&self, item: Item) -> Result<ItemId, QueueError> {
        let id = self.shared.queue.add(item).await?;
        debug!(content_type = %self.shared.content_type, %id, "Item queued");

        if self.shared.connectivity.is_online() {
            Shared::spawn_drain(&self.shared);
        }

        Ok(id)
    }

    /// Upload every pending record once, in order
    pub async fn try_upload(&self) -> Result<DrainReport, QueueError> {
        self.shared.try_upload().await
    }

    /// Download the confirmed list again and append it.
    ///
    /// No deduplication is done against items already in the list.
    pub async fn refresh(&self) -> Result<usize, RemoteError> {
        self.shared.download().await
    }

    /// Wait until the initial download attempt has finished (either way)
    pub async fn loaded(&self) {
        let mut rx = self.shared.loaded.subscribe();
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    /// Drop every pending record
    pub async fn clear_pending(&self) -> Result<(), QueueError> {
        self.shared.queue.clear().await
    }

    /// Register a callback run after every successful state change
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Run every subscriber, in registration order
    pub fn notify(&self) {
        self.shared.notify();
    }
}

impl Drop for ContentManager {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Shared {
    fn spawn_drain(shared: &Arc<Shared>) {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            if let Err(e) = shared.try_upload().await {
                error!(content_type = %shared.content_type, "Drain failed: {}", e);
            }
        });
    }

    #[instrument(skip(self), fields(content_type = %self.content_type))]
    async fn download(&self) -> Result<usize, RemoteError> {
        match self.remote.fetch_all(&self.content_type).await {
            Ok(items) => {
                let count = items.len();
                self.list
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(items);
                info!(count, "Downloaded confirmed items");
                self.notify();
                Ok(count)
            }
            Err(e) => {
                warn!("Download failed, list left as is: {}", e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(content_type = %self.content_type))]
    async fn try_upload(&self) -> Result<DrainReport, QueueError> {
        let _drain = self.drain_lock.lock().await;

        let pending = self.queue.get_all().await?;
        let mut report = DrainReport {
            attempted: pending.len(),
            ..Default::default()
        };

        for record in pending {
            let local_id = record.id();

            match self.remote.push(&self.content_type, &record).await {
                Ok(confirmed) => {
                    match &local_id {
                        Some(id) => self.queue.delete_by_id(id).await?,
                        // Written without an id by another writer
                        None => self.queue.delete_first_without_id().await?,
                    }
                    self.list
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(confirmed);
                    report.uploaded += 1;
                    debug!(local_id = ?local_id, "Uploaded pending record");
                    self.notify();
                }
                Err(e) => {
                    warn!(local_id = ?local_id, "Upload failed, record stays queued: {}", e);
                    report.failure = Some(e);
                    break;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                uploaded = report.uploaded,
                remaining = report.remaining(),
                "Drain finished"
            );
        }

        Ok(report)
    }

    fn notify(&self) {
        // Snapshot so callbacks may subscribe without deadlocking
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, callback) in subscribers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(content_type = %self.content_type, index, "Subscriber panicked");
            }
        }
    }
}

/// Drain every time connectivity comes back.
///
/// Observers only publish real flips, but `watch` keeps just the latest value,
/// so a quick offline-online pair can arrive as one change that still reads
/// online. Any observed change that ends online therefore counts as a
/// reconnect; one that ends offline has nothing to drain against.
async fn listen_for_reconnect(shared: Weak<Shared>, mut online_rx: watch::Receiver<bool>) {
    while online_rx.changed().await.is_ok() {
        if !*online_rx.borrow_and_update() {
            continue;
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        info!(content_type = %shared.content_type, "Connectivity restored, draining pending queue");
        Shared::spawn_drain(&shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::connectivity::ManualConnectivity;
    use crate::storage::{KeyValueQueue, MemoryKeyValueStore};

    struct EmptyRemote;

    #[async_trait]
    impl RemoteStore for EmptyRemote {
        async fn fetch_all(&self, _content_type: &str) -> Result<Vec<Item>, RemoteError> {
            Ok(Vec::new())
        }

        async fn push(&self, _content_type: &str, record: &Item) -> Result<Item, RemoteError> {
            Ok(record.clone())
        }
    }

    fn manager() -> ContentManager {
        let queue = DurableQueue::KeyValue(KeyValueQueue::new(
            "news.pending",
            Arc::new(MemoryKeyValueStore::new()),
        ));
        ContentManager::new(
            "news",
            queue,
            Arc::new(EmptyRemote),
            Arc::new(ManualConnectivity::new(false)),
        )
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_stop_others() {
        let manager = manager();
        manager.loaded().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let before = Arc::clone(&calls);
        let after = Arc::clone(&calls);

        manager.subscribe(move || {
            before.fetch_add(1, Ordering::SeqCst);
        });
        manager.subscribe(|| panic!("subscriber bug"));
        manager.subscribe(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });

        manager.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscribers_run_in_registration_order() {
        let manager = manager();
        manager.loaded().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            manager.subscribe(move || order.lock().unwrap().push(n));
        }

        manager.notify();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_drain_report_counts() {
        let report = DrainReport {
            attempted: 3,
            uploaded: 1,
            failure: Some(RemoteError::MissingId),
        };
        assert_eq!(report.remaining(), 2);
        assert!(!report.is_complete());
        assert!(DrainReport::default().is_complete());
    }
}
