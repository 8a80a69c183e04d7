use std::io::Write;

use serial_test::serial;

use super::*;

fn clear_env() {
    std::env::remove_var(CONFIG_ENV_VAR);
    std::env::remove_var("ONAIR__STORAGE__TYPE");
    std::env::remove_var("ONAIR__MONITOR__FLOOR_DELAY_SECS");
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.storage.storage_type, StorageType::Memory);
    assert_eq!(config.messaging.messaging_type, MessagingType::Channel);
    assert_eq!(config.messaging.queues.requeue, "self-requeue");
    assert_eq!(config.monitor.floor_delay_secs, 10);
    assert_eq!(config.monitor.max_delay_secs, 900);
    assert_eq!(config.scoring.points_per_position, 100);
    assert_eq!(config.limits.max_groups, 5);
    assert!(config.worker.stages.is_empty());
}

#[test]
fn test_worker_runs_every_stage_by_default() {
    let worker = WorkerConfig::default();
    assert!(worker.runs(Stage::Monitor));
    assert!(worker.runs(Stage::Distributor));

    let worker = WorkerConfig {
        stages: vec![Stage::Scorer],
        kick_off: false,
    };
    assert!(worker.runs(Stage::Scorer));
    assert!(!worker.runs(Stage::Monitor));
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
storage:
  type: dynamo
  dynamo:
    table_name: radio
    endpoint_url: http://localhost:8000
messaging:
  type: sqs
  queues:
    score_batch: points
monitor:
  feed_url: https://radio.example/now
scoring:
  jitter_bound: 0
worker:
  stages: [monitor, scorer]
"#
    )
    .unwrap();

    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.storage.storage_type, StorageType::Dynamo);
    assert_eq!(config.storage.dynamo.table_name, "radio");
    assert_eq!(config.storage.dynamo.index_name, "gsi");
    assert_eq!(
        config.storage.dynamo.endpoint_url.as_deref(),
        Some("http://localhost:8000")
    );
    assert_eq!(config.messaging.messaging_type, MessagingType::Sqs);
    assert_eq!(config.messaging.queues.score_batch, "points");
    assert_eq!(config.messaging.queues.scoring, "scoring-trigger");
    assert_eq!(config.monitor.feed_url, "https://radio.example/now");
    assert_eq!(config.scoring.jitter_bound, 0);
    assert_eq!(config.worker.stages, vec![Stage::Monitor, Stage::Scorer]);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "monitor:\n  floor_delay_secs: 30").unwrap();

    std::env::set_var(CONFIG_ENV_VAR, file.path());
    std::env::set_var("ONAIR__MONITOR__FLOOR_DELAY_SECS", "15");

    let config = Config::load(None).unwrap();
    assert_eq!(config.monitor.floor_delay_secs, 15);

    clear_env();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env();
    assert!(Config::load(Some("/nonexistent/onair.yaml")).is_err());
}
