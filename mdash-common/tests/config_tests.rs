//! Configuration loading and root folder resolution
//!
//! Tests touching `MDASH_ROOT_FOLDER` or `MDASH_LOG_LEVEL` are `#[serial]`
//! so they never race on the process environment.

use mdash_common::config::{
    database_path, load_toml_config, resolve_log_level, resolve_root_folder, write_toml_config,
    TomlConfig, LOG_LEVEL_ENV, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/from-toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(Some("/tmp/from-cli"), &config);
    assert_eq!(resolved, PathBuf::from("/tmp/from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/from-env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/from-toml")),
        ..Default::default()
    };

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/from-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_blank_env_falls_through_to_toml() {
    env::set_var(ROOT_FOLDER_ENV, "   ");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/from-toml")),
        ..Default::default()
    };

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/from-toml"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_default_root_folder_is_platform_path() {
    env::remove_var(ROOT_FOLDER_ENV);
    let resolved = resolve_root_folder(None, &TomlConfig::default());
    assert!(resolved.to_string_lossy().contains("mdash"));
    assert!(database_path(&resolved).ends_with("mdash.db"));
}

#[test]
#[serial]
fn test_log_level_env_override() {
    let config = TomlConfig::default();
    env::remove_var(LOG_LEVEL_ENV);
    assert_eq!(resolve_log_level(&config), "info");

    env::set_var(LOG_LEVEL_ENV, "debug,sqlx=warn");
    assert_eq!(resolve_log_level(&config), "debug,sqlx=warn");
    env::remove_var(LOG_LEVEL_ENV);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
port = 6000

[sync]
max_chunk_days = 14

[sources]
crm_client_id = "crm-app"
"#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.port, 6000);
    assert_eq!(config.bind_address, "127.0.0.1");
    assert_eq!(config.sync.max_chunk_days, 14);
    assert_eq!(config.sync.chunk_stagger_ms, 250);
    assert_eq!(config.cache.ttl_seconds, 300);
    assert_eq!(config.sources.crm_client_id.as_deref(), Some("crm-app"));
    assert!(config.sources.crm_client_secret.is_none());
    assert_eq!(config.sources.ads_api_version, "v19.0");
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_toml_config(Some(&dir.path().join("absent.toml")));
    assert!(matches!(result, Err(mdash_common::Error::Config(_))));
}

#[test]
fn test_malformed_toml_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();
    assert!(load_toml_config(Some(&path)).is_err());
}

#[test]
fn test_write_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let mut config = TomlConfig::default();
    config.identity.user_id = Some("owner-1".to_string());
    config.cache.max_entries = 42;

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(Some(&path)).unwrap();
    assert_eq!(loaded.identity.user_id.as_deref(), Some("owner-1"));
    assert_eq!(loaded.cache.max_entries, 42);
}
