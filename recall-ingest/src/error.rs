//! Ingestion error types
//!
//! Connector and normalization errors are contained at the connector
//! boundary and reported through the ingestion run summary. Only
//! `OrchestratorError` reaches the caller of a run.

use std::time::Duration;
use thiserror::Error;

/// Failure of a connector call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Network failure, 5xx, 429 or timeout: eligible for retry
    #[error("Transient connector error: {0}")]
    Transient(String),

    /// Auth failure, bad configuration or unparseable payload: not retried this run
    #[error("Permanent connector error: {0}")]
    Permanent(String),
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }

    pub fn timed_out(budget: Duration) -> Self {
        ConnectorError::Transient(format!("timed out after {} ms", budget.as_millis()))
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let message = format!("HTTP {}: {}", status.as_u16(), snippet.trim());

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ConnectorError::Transient(message)
        } else {
            ConnectorError::Permanent(message)
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ConnectorError::from_status(status, &err.to_string());
        }
        if err.is_decode() || err.is_builder() {
            ConnectorError::Permanent(err.to_string())
        } else {
            // connect, timeout, request, body
            ConnectorError::Transient(err.to_string())
        }
    }
}

/// Raw record rejected by the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("Raw record is not a JSON object")]
    NotAnObject,

    #[error("Missing source_record_id")]
    MissingSourceRecordId,

    #[error("Record {source_record_id} has no usable identifier and no product name/brand pair")]
    NoUsableIdentifier { source_record_id: String },
}

/// Failure that prevents an ingestion operation from running at all
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown connector: {0}")]
    UnknownConnector(String),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Storage(#[from] recall_common::Error),
}
