//! Config parsing and defaults.

use std::time::Duration;

use reread_core::{CacheConfig, CacheError};

#[test]
fn partial_file_keeps_defaults() {
    let config = CacheConfig::from_toml_str(
        r#"
        db_path = "/tmp/reread-test.db"
        keep_revisions = 3
        retry_max_attempts = 4
        "#,
    )
    .unwrap();

    assert_eq!(config.db_path, std::path::PathBuf::from("/tmp/reread-test.db"));
    assert_eq!(config.keep_revisions, 3);
    assert_eq!(config.retry_policy().max_attempts, 4);
    assert_eq!(config.retry_policy().base, Duration::from_millis(20));
    assert_eq!(config.diff_output_max_lines, 200);
    assert_eq!(config.busy_timeout(), Duration::from_secs(5));
}

#[test]
fn malformed_file_is_an_error() {
    let err = CacheConfig::from_toml_str("keep_revisions = \"many\"").unwrap_err();
    assert!(matches!(err, CacheError::Config(_)), "got: {err:?}");
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = CacheConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.keep_revisions, CacheConfig::default().keep_revisions);
}

#[test]
fn file_on_disk_is_loaded() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "diff_output_max_lines = 50\n").unwrap();
    let config = CacheConfig::load(&path).unwrap();
    assert_eq!(config.diff_output_max_lines, 50);
}
