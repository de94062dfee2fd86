//! Bulk export connector
//!
//! Some regulators publish a full JSON or NDJSON export instead of an API.
//! The export is mirrored locally and read in one pass; `since` filtering
//! uses an optional configured date field.

use super::{extract_records, Connector, RawRecord, RecordStream};
use crate::error::ConnectorError;
use crate::json_path;
use crate::services::normalizer::parse_timestamp_value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_common::config::ConnectorConfig;
use serde_json::Value;
use std::io::ErrorKind;
use tracing::debug;

/// Connector reading a locally mirrored JSON / NDJSON export
pub struct FileDumpConnector {
    config: ConnectorConfig,
}

impl FileDumpConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    async fn read_dump(&self) -> Result<String, ConnectorError> {
        tokio::fs::read_to_string(&self.config.endpoint)
            .await
            .map_err(|e| {
                let message = format!("read {} failed: {}", self.config.endpoint, e);
                match e.kind() {
                    ErrorKind::InvalidData => ConnectorError::Permanent(message),
                    // Mirror may be mid-refresh
                    _ => ConnectorError::Transient(message),
                }
            })
    }

    /// True when the record's `since.field` is on or after the watermark date.
    /// Records without a parseable date are kept.
    fn changed_since(&self, record: &Value, since: DateTime<Utc>) -> bool {
        let Some(field) = self.config.since.as_ref().and_then(|s| s.field.as_deref()) else {
            return true;
        };

        json_path::lookup(record, field)
            .and_then(parse_timestamp_value)
            .map(|ts| ts.date_naive() >= since.date_naive())
            .unwrap_or(true)
    }
}

/// Parse a whole-document JSON export, falling back to NDJSON
fn parse_dump(content: &str, records_path: Option<&str>) -> Result<Vec<Value>, ConnectorError> {
    if let Ok(document) = serde_json::from_str::<Value>(content) {
        return extract_records(document, records_path);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<Value>(line).map_err(|e| {
                ConnectorError::Permanent(format!("NDJSON line {}: {}", index + 1, e))
            })
        })
        .collect()
}

#[async_trait]
impl Connector for FileDumpConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn agency(&self) -> &str {
        &self.config.agency
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<RecordStream, ConnectorError> {
        let content = self.read_dump().await?;
        let records = parse_dump(&content, self.config.records_path.as_deref())?;
        let total = records.len();

        let selected: Vec<Result<RawRecord, ConnectorError>> = records
            .into_iter()
            .filter(|record| self.changed_since(record, since))
            .map(|record| Ok(RawRecord::new(record)))
            .collect();

        debug!(
            connector = %self.config.name,
            total,
            selected = selected.len(),
            "Read bulk export"
        );

        Ok(Box::pin(futures::stream::iter(selected)))
    }
}
