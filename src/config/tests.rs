use super::*;
use serial_test::serial;
use std::io::Write;

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.storage.storage_type, StorageType::Memory);
    assert_eq!(config.queue.visibility_timeout_secs, 30);
    assert_eq!(config.queue.max_receive_count, 5);
    assert_eq!(config.retry.max_times, 5);
    assert_eq!(config.physical_table("Subscriptions"), "Subscriptions");
}

#[test]
#[serial]
fn test_load_from_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "storage:\n  type: dynamo\n  region: eu-west-1\ntables:\n  Subscriptions: prod-subscriptions\nqueue:\n  max_receive_count: 3"
    )
    .unwrap();

    let config = Config::load(file.path().to_str()).unwrap();
    assert_eq!(config.storage.storage_type, StorageType::Dynamo);
    assert_eq!(config.storage.region.as_deref(), Some("eu-west-1"));
    assert_eq!(config.physical_table("Subscriptions"), "prod-subscriptions");
    assert_eq!(config.physical_table("Metrics"), "Metrics");
    assert_eq!(config.queue.max_receive_count, 3);
    // Untouched fields keep their defaults.
    assert_eq!(config.queue.batch_size, 10);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "retry:\n  max_times: 2").unwrap();

    std::env::set_var("DYNAFORGE__RETRY__MAX_TIMES", "7");
    let config = Config::load(file.path().to_str());
    std::env::remove_var("DYNAFORGE__RETRY__MAX_TIMES");

    assert_eq!(config.unwrap().retry.max_times, 7);
}

#[test]
#[serial]
fn test_missing_explicit_file_fails() {
    assert!(Config::load(Some("/nonexistent/dynaforge.yaml")).is_err());
}

#[test]
#[serial]
fn test_env_table_override_applies_to_mixed_case_name() {
    std::env::set_var("DYNAFORGE__TABLES__METRICS", "staging-metrics");
    let config = Config::load(None);
    std::env::remove_var("DYNAFORGE__TABLES__METRICS");

    let config = config.unwrap();
    assert_eq!(config.physical_table("Metrics"), "staging-metrics");
    assert_eq!(config.physical_table("metrics"), "staging-metrics");
}
