//! Core infrastructure tests.

mod common;

use common::test_config;
use kinestore::cli::load_config;
use kinestore::core::config::{Config, ConfigOverrides};
use kinestore::core::error::{EtcdErrorMapping, GrpcCode, StoreError};
use kinestore::core::runtime::{ComponentHealth, Runtime};
use kinestore::mvcc::Event;
use kinestore::storage::AdmissionPolicy;
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_config_file() {
    let config_content = r#"
[database]
path = "/var/lib/kine/state.db"
max_open_connections = 16
lock_writes = false

[admission]
policy = "limit"
max_concurrent = 10

[log]
poll_interval_ms = 250
gap_fill_threshold_ms = 2000

[telemetry]
log_level = "debug"
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config_content.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.database.path, "/var/lib/kine/state.db");
    assert_eq!(config.database.max_open_connections, 16);
    assert!(!config.database.lock_writes);
    assert_eq!(config.log.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.log.gap_fill_threshold(), Duration::from_secs(2));
    assert_eq!(config.log.compact_interval(), Duration::from_secs(300));
    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(
        config.admission.resolve(),
        AdmissionPolicy::Limit {
            max_concurrent: 10,
            only_write_queries: false
        }
    );
}

#[test]
fn validate_rejects_idle_above_open() {
    let config_content = r#"
[database]
max_open_connections = 2
max_idle_connections = 4
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config_content.as_bytes()).unwrap();

    let result = Config::from_file(file.path());
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("max_idle_connections"));
}

#[test]
fn validate_rejects_zero_poll_interval() {
    let err = Config::from_toml("[log]\npoll_interval_ms = 0\n").unwrap_err();
    assert!(err.to_string().contains("poll_interval_ms"));
}

#[test]
fn validate_rejects_unknown_log_level() {
    let err = Config::from_toml("[telemetry]\nlog_level = \"loud\"\n").unwrap_err();
    assert!(err.to_string().contains("log_level"));
}

#[test]
fn validate_rejects_zero_admission_limit() {
    let err = Config::from_toml("[admission]\npolicy = \"limit\"\nmax_concurrent = 0\n")
        .unwrap_err();
    assert!(err.to_string().contains("max_concurrent"));
}

#[test]
fn unknown_admission_policy_degrades_to_allow_all() {
    let config = Config::from_toml("[admission]\npolicy = \"fancy\"\n").unwrap();
    assert_eq!(config.admission.resolve(), AdmissionPolicy::AllowAll);
}

#[test]
fn overrides_win_over_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[database]\npath = \"from-file.db\"\n").unwrap();

    let overrides = ConfigOverrides {
        log_level: Some("warn".to_string()),
        database: Some("from-flag.db".to_string()),
    };
    let config = load_config(file.path(), &overrides).unwrap();
    assert_eq!(config.database.path, "from-flag.db");
    assert_eq!(config.telemetry.log_level, "warn");
}

#[test]
fn missing_config_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&dir.path().join("absent.toml"), &ConfigOverrides::default()).unwrap();
    assert_eq!(config.database.path, "data/kine.db");
    assert_eq!(config.admission.resolve(), AdmissionPolicy::AllowAll);
}

#[test]
fn invalid_override_is_rejected() {
    let dir = TempDir::new().unwrap();
    let overrides = ConfigOverrides {
        log_level: Some("chatty".to_string()),
        database: None,
    };
    assert!(load_config(&dir.path().join("absent.toml"), &overrides).is_err());
}

// ============================================================================
// Error mapping tests
// ============================================================================

#[test]
fn errors_map_to_etcd_codes() {
    let cases = [
        (StoreError::compacted(5, 10), GrpcCode::OutOfRange),
        (
            StoreError::Denied {
                op: "insert",
                limit: 2,
            },
            GrpcCode::ResourceExhausted,
        ),
        (StoreError::KeyExists { op: "insert" }, GrpcCode::AlreadyExists),
        (
            StoreError::RetriesExhausted {
                op: "fill",
                attempts: 500,
                message: "database is locked".to_string(),
            },
            GrpcCode::Unavailable,
        ),
        (StoreError::database("get_size", "disk I/O error"), GrpcCode::Internal),
        (StoreError::Cancelled, GrpcCode::Cancelled),
    ];
    for (err, code) in cases {
        assert_eq!(EtcdErrorMapping::to_grpc_code(&err), code, "{err}");
    }

    assert_eq!(
        EtcdErrorMapping::to_error_message(&StoreError::KeyExists { op: "insert" }),
        "etcdserver: key exists"
    );
}

#[test]
fn exhausted_retries_name_the_attempt_count() {
    let err = StoreError::RetriesExhausted {
        op: "insert",
        attempts: 500,
        message: "database is locked".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("insert"));
    assert!(msg.contains("500"));
    assert!(err.is_retriable());
}

// ============================================================================
// Runtime tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runtime_start_and_stop() {
    let dir = TempDir::new().unwrap();
    let mut runtime = Runtime::new(test_config(&dir)).unwrap();
    assert_eq!(runtime.health(), ComponentHealth::Starting);
    assert!(runtime.log().is_none());

    runtime.start().await.unwrap();
    assert!(runtime.is_running());
    assert_eq!(runtime.health(), ComponentHealth::Healthy);

    let log = runtime.log().unwrap().clone();
    let revision = log.append(&Event::create("/rt/a", "v")).await.unwrap();
    assert_eq!(log.current_revision().await.unwrap(), revision);
    assert!(runtime.metrics().export().contains("kine_sql_operation_result_total"));

    runtime.stop().await;
    assert!(!runtime.is_running());
    assert_eq!(runtime.health(), ComponentHealth::Stopped);
    assert!(runtime.cancellation_token().is_cancelled());
    assert!(runtime.log().is_none());
}

#[tokio::test]
async fn runtime_reports_open_failure() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.database.path = dir.path().display().to_string();
    config.database.open_attempts = 1;

    let mut runtime = Runtime::new(config).unwrap();
    assert!(runtime.start().await.is_err());
    assert_eq!(runtime.health(), ComponentHealth::Failed);
    assert!(!runtime.is_running());
}

#[test]
fn runtime_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.database.open_attempts = 0;
    assert!(Runtime::new(config).is_err());
}
