use super::*;
use crate::bus::MockQueue;
use crate::storage::{keys, MemoryStore};

fn entries(n: usize) -> Vec<ScoreEntry> {
    (0..n)
        .map(|i| ScoreEntry {
            user_id: format!("u{}", i),
            points: 101,
            song_id: Some("123".to_string()),
        })
        .collect()
}

fn delivery(id: &str, body: &str) -> Delivery {
    Delivery {
        id: id.to_string(),
        body: body.to_string(),
        receive_count: 1,
    }
}

fn distributor(store: Arc<MemoryStore>, queue: Arc<MockQueue>) -> PointDistributor {
    PointDistributor::new(store, queue, MAX_BATCH_SIZE)
}

#[tokio::test]
async fn test_fan_out_splits_into_batches_of_ten() {
    let queue = Arc::new(MockQueue::new("score-batch"));
    let distributor = distributor(Arc::new(MemoryStore::new()), queue.clone());

    let report = distributor.fan_out(entries(23)).await;
    assert!(report.is_complete());
    assert_eq!(report.sent, 23);

    let mut sizes = queue.batch_sizes().await;
    sizes.sort_unstable();
    assert_eq!(sizes, vec![3, 10, 10]);

    let mut users: Vec<String> = queue
        .decoded::<ScoreEntry>()
        .await
        .into_iter()
        .map(|e| e.user_id)
        .collect();
    users.sort();
    let mut expected: Vec<String> = entries(23).into_iter().map(|e| e.user_id).collect();
    expected.sort();
    assert_eq!(users, expected);
}

#[tokio::test]
async fn test_fan_out_of_nothing_sends_nothing() {
    let queue = Arc::new(MockQueue::new("score-batch"));
    let distributor = distributor(Arc::new(MemoryStore::new()), queue.clone());

    let report = distributor.fan_out(Vec::new()).await;
    assert_eq!(report, DistributionReport::default());
    assert!(queue.batch_sizes().await.is_empty());
}

#[tokio::test]
async fn test_fan_out_reports_rejected_entries_only() {
    let queue = Arc::new(MockQueue::new("score-batch"));
    queue.reject_containing(Some(r#""u4""#)).await;
    let distributor = distributor(Arc::new(MemoryStore::new()), queue.clone());

    let report = distributor.fan_out(entries(12)).await;
    assert_eq!(report.sent, 11);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].user_id, "u4");
    assert_eq!(queue.sent_count().await, 11);
}

#[tokio::test]
async fn test_fan_out_batch_failure_fails_every_entry() {
    let queue = Arc::new(MockQueue::new("score-batch"));
    queue.set_fail_on_batch(true).await;
    let distributor = distributor(Arc::new(MemoryStore::new()), queue);

    let report = distributor.fan_out(entries(15)).await;
    assert_eq!(report.sent, 0);
    assert_eq!(report.failed.len(), 15);
}

#[tokio::test]
async fn test_batch_size_is_clamped() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MockQueue::new("score-batch"));
    assert_eq!(
        PointDistributor::new(store.clone(), queue.clone(), 50).batch_size(),
        10
    );
    assert_eq!(PointDistributor::new(store, queue, 0).batch_size(), 1);
}

#[tokio::test]
async fn test_apply_credits_users() {
    let store = Arc::new(MemoryStore::new());
    let users = UserRepository::new(store.clone());
    users.create("u1", "Ana").await.unwrap();
    users.create("u2", "Ben").await.unwrap();
    let distributor = distributor(store, Arc::new(MockQueue::default()));

    let response = distributor
        .apply(vec![
            delivery("m1", r#"{"userID":"u1","points":101}"#),
            delivery("m2", r#"{"userID":"u2","points":101}"#),
            delivery("m3", r#"{"userID":"u1","points":5}"#),
        ])
        .await;

    assert!(response.is_ok());
    assert_eq!(users.get("u1").await.unwrap().unwrap().points, 106);
    assert_eq!(users.get("u2").await.unwrap().unwrap().points, 101);
}

#[tokio::test]
async fn test_apply_drops_unknown_users_and_malformed_bodies() {
    let store = Arc::new(MemoryStore::new());
    let distributor = distributor(store.clone(), Arc::new(MockQueue::default()));

    let response = distributor
        .apply(vec![
            delivery("m1", r#"{"userID":"ghost","points":101}"#),
            delivery("m2", "not json"),
            delivery("m3", r#"{"userID":"","points":1}"#),
        ])
        .await;

    assert!(response.is_ok());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_apply_reports_transient_failures() {
    let store = Arc::new(MemoryStore::new());
    let users = UserRepository::new(store.clone());
    users.create("u1", "Ana").await.unwrap();
    users.create("u2", "Ben").await.unwrap();
    store.fail_updates_for(keys::user("u2")).await;
    let distributor = distributor(store, Arc::new(MockQueue::default()));

    let response = distributor
        .apply(vec![
            delivery("m1", r#"{"userID":"u1","points":10}"#),
            delivery("m2", r#"{"userID":"u2","points":10}"#),
        ])
        .await;

    assert_eq!(response.failed, vec!["m2".to_string()]);
    assert_eq!(users.get("u1").await.unwrap().unwrap().points, 10);
    assert_eq!(users.get("u2").await.unwrap().unwrap().points, 0);
}
