//! Source connectors
//!
//! A connector adapts one regulatory source to a stream of raw JSON records.
//! Connectors are selected by configuration (`kind`), not per-source code:
//! adding a source means adding a `[[connectors]]` entry and its field
//! mapping.

pub mod file_dump;
pub mod http_json;

pub use file_dump::FileDumpConnector;
pub use http_json::HttpJsonConnector;

use crate::error::ConnectorError;
use crate::json_path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use recall_common::config::{ConnectorConfig, ConnectorKind, RecallConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One untyped record as published by a source
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(pub Value);

impl RawRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Records yielded by a fetch. An `Err` item ends the fetch.
pub type RecordStream = BoxStream<'static, Result<RawRecord, ConnectorError>>;

/// Adapter for one external source
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique connector name (matches the `[[connectors]]` entry)
    fn name(&self) -> &str;

    /// Value written to `source_agency`
    fn agency(&self) -> &str;

    /// Stream records changed since `since`. Pagination and rate limiting
    /// happen inside the stream.
    async fn fetch(&self, since: DateTime<Utc>) -> Result<RecordStream, ConnectorError>;

    /// Cheap reachability probe used by the circuit breaker re-check:
    /// open a fetch and pull at most one record.
    async fn health_check(&self) -> Result<(), ConnectorError> {
        let mut stream = self.fetch(unix_epoch()).await?;
        match stream.next().await {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Watermark used for a connector's first fetch
pub fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Pull the record array out of a page (or a whole dump).
///
/// A missing `records_path` key is treated as an empty page.
pub(crate) fn extract_records(
    body: Value,
    records_path: Option<&str>,
) -> Result<Vec<Value>, ConnectorError> {
    let located = match records_path {
        Some(path) => match json_path::lookup(&body, path) {
            Some(value) => value.clone(),
            None => return Ok(Vec::new()),
        },
        None => body,
    };

    match located {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(ConnectorError::Permanent(format!(
            "expected an array of records at '{}', found {}",
            records_path.unwrap_or(""),
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read a secret from the environment variable named in configuration
pub(crate) fn read_secret(connector: &str, env_var: &str) -> Result<String, ConnectorError> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConnectorError::Permanent(format!(
            "connector '{}': credential environment variable {} is not set",
            connector, env_var
        ))),
    }
}

/// Instantiate a connector for one configuration entry
pub fn build_connector(
    config: &ConnectorConfig,
    default_timeout: Duration,
) -> Result<Arc<dyn Connector>, ConnectorError> {
    let timeout = config
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);

    let connector: Arc<dyn Connector> = match config.kind {
        ConnectorKind::HttpJson => Arc::new(HttpJsonConnector::new(config.clone(), timeout)?),
        ConnectorKind::FileDump => Arc::new(FileDumpConnector::new(config.clone())),
    };
    Ok(connector)
}

/// Instantiate every configured connector (enabled or not)
pub fn build_connectors(config: &RecallConfig) -> Result<Vec<Arc<dyn Connector>>, ConnectorError> {
    config
        .connectors
        .iter()
        .map(|c| build_connector(c, config.ingest.timeout()))
        .collect()
}
