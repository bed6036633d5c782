//! Tracing initialisation tests
//!
//! The global subscriber can be installed once per process, so this file
//! holds a single test.

use scriba_common::config::LoggingConfig;
use scriba_common::logging::init_tracing;
use tempfile::TempDir;

#[test]
fn test_file_log_carries_level_and_source_location() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scriba.log");
    std::env::remove_var("RUST_LOG");

    init_tracing(&LoggingConfig {
        level: "debug".to_string(),
        file: Some(path.clone()),
    })
    .unwrap();
    tracing::info!(unit_index = 3, "Unit generated");

    let written = std::fs::read_to_string(&path).unwrap();
    let line = written
        .lines()
        .find(|l| l.contains("Unit generated"))
        .expect("log line written");
    assert!(line.contains("INFO"));
    assert!(line.contains("logging_tests.rs:"));
    assert!(line.contains("unit_index=3"));

    // Second install is reported, not a panic
    assert!(init_tracing(&LoggingConfig::default()).is_err());
}
