//! Connector health (circuit breaker state)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breaker state of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Skipped by the orchestrator until a health re-check succeeds
    Degraded,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "degraded" => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Persisted health of one connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorHealth {
    pub name: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Start time of the last successful fetch; next fetch asks for changes since then
    pub watermark: Option<DateTime<Utc>>,
    /// Last time the connector was attempted (used for poll intervals)
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ConnectorHealth {
    /// Health of a connector that has never run
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
            watermark: None,
            last_attempt_at: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == HealthStatus::Degraded
    }
}
