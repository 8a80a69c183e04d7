use super::*;

#[test]
fn test_delivery_decode() {
    let delivery = Delivery {
        id: "m1".to_string(),
        body: r#"{"songID":"123"}"#.to_string(),
        receive_count: 1,
    };
    let trigger: ScoringTrigger = delivery.decode().unwrap();
    assert_eq!(trigger.song_id, "123");

    let err = delivery.decode::<ScoreEntry>().unwrap_err();
    assert!(matches!(err, BusError::Decode(_)));
}

#[test]
fn test_batch_response_retry_all() {
    let deliveries = vec![
        Delivery {
            id: "a".to_string(),
            body: String::new(),
            receive_count: 1,
        },
        Delivery {
            id: "b".to_string(),
            body: String::new(),
            receive_count: 2,
        },
    ];
    let response = BatchResponse::retry_all(&deliveries);
    assert_eq!(response.failed, vec!["a", "b"]);
    assert!(!response.is_ok());
    assert!(BatchResponse::ok().is_ok());
}

#[tokio::test]
async fn test_send_json() {
    let queue = MockQueue::new("self-requeue");
    send_json(&queue, &RequeueMessage::tracking("9"), Duration::from_secs(10))
        .await
        .unwrap();

    let sent = queue.sent().await;
    assert_eq!(sent[0].body, r#"{"songID":"9"}"#);
    assert_eq!(sent[0].delay, Duration::from_secs(10));
}

#[tokio::test]
async fn test_init_channel_queues() {
    let queues = init_queues(&MessagingConfig::default()).await.unwrap();
    assert_eq!(queues.requeue.name(), "self-requeue");
    assert_eq!(queues.scoring.name(), "scoring-trigger");
    assert_eq!(queues.score_batch.name(), "score-batch");
}
