//! Durable Queue Integration Tests
//!
//! The same contract is exercised against both backends: ordering, id
//! assignment, deletion, clearing, and survival across reopen.

use std::sync::Arc;

use contentsync::domain::{Item, ItemId};
use contentsync::storage::{
    pending_queue_name, DurableQueue, KeyValueQueue, KeyValueStore, MemoryKeyValueStore,
    QueueBackend, QueueError, TransactionalQueue,
};
use tempfile::TempDir;

/// One queue per backend, both named `comments.pending`
fn queues(temp: &TempDir) -> Vec<DurableQueue> {
    let name = pending_queue_name("comments");
    vec![
        DurableQueue::open(
            QueueBackend::KeyValue,
            &name,
            &temp.path().join("kv"),
            &temp.path().join("sync.db"),
        ),
        DurableQueue::open(
            QueueBackend::Transactional,
            &name,
            &temp.path().join("kv"),
            &temp.path().join("sync.db"),
        ),
    ]
}

fn names(records: &[Item]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string())
        .collect()
}

#[tokio::test]
async fn test_empty_queue_returns_empty() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        assert!(queue.get_all().await.unwrap().is_empty(), "{:?}", queue);
    }
}

#[tokio::test]
async fn test_add_preserves_order_and_fields() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        for name in ["A", "B", "C"] {
            queue
                .add(Item::new().with("name", name).with("text", "hi").with("time", 1000))
                .await
                .unwrap();
        }

        let records = queue.get_all().await.unwrap();
        assert_eq!(names(&records), vec!["A", "B", "C"], "{:?}", queue);
        assert_eq!(records[0].get("time").unwrap(), 1000);
    }
}

#[tokio::test]
async fn test_add_assigns_time_based_distinct_ids() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        let before = chrono::Utc::now().timestamp_millis() as f64;

        let first = queue.add(Item::new().with("text", "x")).await.unwrap();
        let second = queue.add(Item::new().with("text", "x")).await.unwrap();

        let (a, b) = (first.as_f64().unwrap(), second.as_f64().unwrap());
        assert!(matches!(first, ItemId::Number(_)));
        assert!(a >= before && a < before + 60_000.0);
        assert_ne!(first, second);

        // The stored records carry the same ids
        let stored: Vec<ItemId> = queue
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id().unwrap())
            .collect();
        assert_eq!(stored, vec![ItemId::from(a), ItemId::from(b)]);
    }
}

#[tokio::test]
async fn test_add_keeps_caller_supplied_id() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        let id = queue
            .add(Item::new().with("id", "draft-1").with("text", "x"))
            .await
            .unwrap();
        assert_eq!(id, ItemId::from("draft-1"));
    }
}

#[tokio::test]
async fn test_delete_by_id() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        let a = queue.add(Item::new().with("name", "A")).await.unwrap();
        queue.add(Item::new().with("name", "B")).await.unwrap();

        queue.delete_by_id(&a).await.unwrap();
        assert_eq!(names(&queue.get_all().await.unwrap()), vec!["B"]);

        // Absent id is a no-op
        queue.delete_by_id(&ItemId::from(42i64)).await.unwrap();
        assert_eq!(queue.get_all().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_delete_matches_string_and_number_ids() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        queue.add(Item::new().with("id", 15).with("name", "A")).await.unwrap();
        queue.delete_by_id(&ItemId::from("15")).await.unwrap();
        assert!(queue.get_all().await.unwrap().is_empty(), "{:?}", queue);
    }
}

#[tokio::test]
async fn test_clear_then_get_all_is_empty() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        // Clearing an untouched queue is fine too
        queue.clear().await.unwrap();
        assert!(queue.get_all().await.unwrap().is_empty());

        for n in 0..3 {
            queue.add(Item::new().with("n", n)).await.unwrap();
        }
        queue.clear().await.unwrap();
        assert!(queue.get_all().await.unwrap().is_empty());

        queue.clear().await.unwrap();
        assert!(queue.get_all().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let temp = TempDir::new().unwrap();
    for queue in queues(&temp) {
        queue.add(Item::new().with("name", "A")).await.unwrap();
    }

    // Fresh handles against the same storage
    for queue in queues(&temp) {
        assert_eq!(names(&queue.get_all().await.unwrap()), vec!["A"], "{:?}", queue);
    }
}

#[tokio::test]
async fn test_same_name_means_same_storage() {
    let store = MemoryKeyValueStore::new();
    let first = KeyValueQueue::new("news.pending", Arc::new(store.clone()));
    let second = KeyValueQueue::new("news.pending", Arc::new(store.clone()));

    first.add(Item::new().with("title", "t")).await.unwrap();
    assert_eq!(second.get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrupted_key_value_payload_is_an_error() {
    let store = MemoryKeyValueStore::new();
    store
        .set("comments.pending", "not-json".to_string())
        .await
        .unwrap();
    let queue = DurableQueue::KeyValue(KeyValueQueue::new(
        "comments.pending",
        Arc::new(store.clone()),
    ));

    match queue.get_all().await {
        Err(QueueError::Corrupted { name, .. }) => assert_eq!(name, "comments.pending"),
        other => panic!("expected corruption error, got {:?}", other.map(|r| r.len())),
    }

    // Writes refuse to paper over the corruption as well
    assert!(matches!(
        queue.add(Item::new().with("text", "x")).await,
        Err(QueueError::Corrupted { .. })
    ));
}

#[tokio::test]
async fn test_transactional_open_failure_is_surfaced() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();

    let queue = DurableQueue::Transactional(TransactionalQueue::open(
        "news.pending",
        &blocker.join("sync.db"),
    ));

    assert!(matches!(queue.ready().await, Err(QueueError::BackendInit(_))));
    assert!(matches!(queue.get_all().await, Err(QueueError::BackendInit(_))));
    assert!(matches!(
        queue.delete_by_id(&ItemId::from(1i64)).await,
        Err(QueueError::BackendInit(_))
    ));
}
