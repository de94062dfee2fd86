//! Configuration loading and path resolution
//!
//! Tests that touch RECALL_CONFIG / RECALL_ROOT are marked #[serial] so they
//! never race on the process environment.

use recall_common::config::{
    resolve_config_path, resolve_root_folder, AuthConfig, ConnectorKind, PaginationConfig,
    RecallConfig, CONFIG_ENV_VAR, ROOT_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONNECTOR_TOML: &str = r#"
    root_folder = "/var/lib/recall"

    [ingest]
    max_concurrency = 8
    timeout_secs = 30

    [[connectors]]
    name = "nhtsa"
    agency = "NHTSA"
    kind = "http_json"
    endpoint = "https://api.example.test/recalls"
    records_path = "results"
    poll_interval_secs = 600

    [connectors.auth]
    mode = "bearer"
    env = "NHTSA_TOKEN"

    [connectors.pagination]
    mode = "page"
    page_param = "p"
    page_size = 25

    [connectors.field_mapping]
    source_record_id = "NHTSACampaignNumber"
    vehicle_make = { path = "Make", coerce = "upper" }
    vehicle_model = { path = "Model", coerce = "upper" }
    vehicle_year = { path = "ModelYear", coerce = "year" }

    [[connectors]]
    name = "eu_dump"
    agency = "EU_SAFETY_GATE"
    kind = "file_dump"
    endpoint = "/data/safety_gate.ndjson"
    enabled = false

    [connectors.field_mapping]
    source_record_id = "reference"
    region = { default = "EU" }
"#;

#[test]
fn test_load_connectors_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONNECTOR_TOML).unwrap();

    let config = RecallConfig::load(&path).unwrap();
    assert_eq!(config.ingest.max_concurrency, 8);
    assert_eq!(config.ingest.max_attempts, 3);
    assert_eq!(config.connectors.len(), 2);

    let nhtsa = config.connector("nhtsa").unwrap();
    assert_eq!(nhtsa.kind, ConnectorKind::HttpJson);
    assert_eq!(nhtsa.poll_interval(), chrono::Duration::seconds(600));
    assert!(matches!(&nhtsa.auth, AuthConfig::Bearer { env } if env == "NHTSA_TOKEN"));
    assert!(matches!(
        &nhtsa.pagination,
        PaginationConfig::Page { page_param, page_size: 25, .. } if page_param == "p"
    ));

    let eu = config.connector("eu_dump").unwrap();
    assert_eq!(eu.kind, ConnectorKind::FileDump);
    assert!(!eu.enabled);
    assert_eq!(eu.field_mapping["region"].default.as_deref(), Some("EU"));
}

#[test]
fn test_load_missing_file_is_config_error() {
    let result = RecallConfig::load(Path::new("/nonexistent/recall/config.toml"));
    assert!(matches!(result, Err(recall_common::Error::Config(_))));
}

#[test]
#[serial]
fn test_config_path_priority() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let cli = PathBuf::from("/from/cli.toml");
    assert_eq!(resolve_config_path(Some(&cli)), Some(cli.clone()));
    assert_eq!(resolve_config_path(None), Some(PathBuf::from("/from/env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_root_folder_priority() {
    let config = RecallConfig::from_toml_str(CONNECTOR_TOML).unwrap();
    env::remove_var(ROOT_ENV_VAR);

    // TOML beats the OS default
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/var/lib/recall"));

    // ENV beats TOML
    env::set_var(ROOT_ENV_VAR, "/tmp/recall-env");
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/recall-env"));

    // CLI beats everything
    let cli = PathBuf::from("/tmp/recall-cli");
    assert_eq!(resolve_root_folder(Some(&cli), &config), cli);

    env::remove_var(ROOT_ENV_VAR);
}

#[test]
#[serial]
fn test_root_folder_falls_back_to_os_default() {
    env::remove_var(ROOT_ENV_VAR);
    let root = resolve_root_folder(None, &RecallConfig::default());
    assert!(!root.as_os_str().is_empty());
    assert!(root.ends_with("recall") || root.ends_with("recall_data"));
}
