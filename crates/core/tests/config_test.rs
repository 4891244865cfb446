use scheduler_core::config::*;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.scheduler.tick_interval_ms, 1000);
    assert_eq!(config.scheduler.lookahead_minutes, 30);
    assert_eq!(config.worker.terminated_retention_seconds, 2);
    assert_eq!(config.worker.direct_queue_slot, 1000);
    assert_eq!(config.agent.poll_interval_ms, 2000);
    assert_eq!(config.agent.submit_max_attempts, 3);
    assert_eq!(config.agent.poll_max_attempts, 5);
    assert_eq!(config.agent.retry_backoff_ms, 1000);
}

#[test]
fn test_config_from_partial_toml() {
    let toml_content = r#"
[scheduler]
lookahead_minutes = 60

[agent]
poll_interval_ms = 500
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.scheduler.lookahead_minutes, 60);
    assert_eq!(config.scheduler.tick_interval_ms, 1000);
    assert_eq!(config.agent.poll_interval_ms, 500);
    assert_eq!(config.agent.request_timeout_ms, 2000);
    assert_eq!(config.observability.log_format, "pretty");
}

#[test]
fn test_config_roundtrip_through_toml() {
    let mut config = AppConfig::default();
    config.worker.direct_queue_slot = 12;
    config.definitions.path = "/etc/taskflow/definitions.json".to_string();

    let toml_str = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.worker.direct_queue_slot, 12);
    assert_eq!(parsed.definitions.path, "/etc/taskflow/definitions.json");
}

#[test]
fn test_config_validation_rejects_zero_values() {
    let mut config = AppConfig::default();
    config.scheduler.tick_interval_ms = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.agent.poll_max_attempts = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.worker.direct_queue_slot = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_load_from_file() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(
        temp_file.path(),
        r#"
[worker]
housekeeping_interval_ms = 250
terminated_retention_seconds = 5

[definitions]
path = "defs.json"
"#,
    )
    .unwrap();

    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap())).unwrap();
    assert_eq!(config.worker.housekeeping_interval_ms, 250);
    assert_eq!(config.worker.terminated_retention_seconds, 5);
    assert_eq!(config.definitions.path, "defs.json");
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/scheduler.toml"));
    assert!(result.is_err());
}

#[test]
fn test_environment_override() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), "[scheduler]\nupcoming_view_limit = 10\n").unwrap();

    std::env::set_var("SCHEDULER__SCHEDULER__UPCOMING_VIEW_LIMIT", "42");
    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap()));
    std::env::remove_var("SCHEDULER__SCHEDULER__UPCOMING_VIEW_LIMIT");

    assert_eq!(config.unwrap().scheduler.upcoming_view_limit, 42);
}

#[test]
fn test_shipped_sample_config_matches_defaults() {
    let config = AppConfig::from_toml(include_str!("../../../config/scheduler.toml")).unwrap();
    let defaults = AppConfig::default();

    assert_eq!(config.to_toml().unwrap(), defaults.to_toml().unwrap());
}
