//! Ingestion run state machine
//!
//! One run per orchestration cycle:
//! Scheduled → Running → {Success | Partial | Failed}
//!
//! The run entity is the single source of truth for what happened during a
//! cycle. It is written once, when the run reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ingestion run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Scheduled,
    Running,
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Partial | RunStatus::Failed)
    }

    /// Legal transitions of the run state machine
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Scheduled, RunStatus::Running) => true,
            // A run that could not start fails without ever running
            (RunStatus::Scheduled, RunStatus::Failed) => true,
            (RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Scheduled => "scheduled",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(RunStatus::Scheduled),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connector outcome within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorOutcome {
    Succeeded,
    Failed,
    /// Not attempted (degraded by the circuit breaker, or not due)
    Skipped,
}

/// Per-connector sub-status of an ingestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorRunStatus {
    pub connector_name: String,
    pub outcome: ConnectorOutcome,
    pub records_fetched: u64,
    pub records_upserted: u64,
    pub records_rejected: u64,
    pub attempts: u32,
    /// Set when the failure was transient (retry eligible next run)
    #[serde(default)]
    pub transient: bool,
    pub error: Option<String>,
}

impl ConnectorRunStatus {
    pub fn skipped(connector_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            connector_name: connector_name.into(),
            outcome: ConnectorOutcome::Skipped,
            records_fetched: 0,
            records_upserted: 0,
            records_rejected: 0,
            attempts: 0,
            transient: false,
            error: Some(reason.into()),
        }
    }
}

/// Ingestion run entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub connectors: Vec<ConnectorRunStatus>,
}

impl IngestionRun {
    /// Create a new run in the Scheduled state
    pub fn scheduled() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Scheduled,
            started_at: Utc::now(),
            finished_at: None,
            connectors: Vec::new(),
        }
    }

    /// Move the run to `next`, returning false (and leaving the run untouched)
    /// if the transition is not legal
    pub fn transition_to(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                run_id = %self.run_id,
                from = %self.status,
                to = %next,
                "Rejected illegal ingestion run transition"
            );
            return false;
        }

        if next == RunStatus::Running {
            self.started_at = Utc::now();
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = next;
        true
    }

    /// Terminal status implied by the connector sub-statuses.
    ///
    /// Skipped connectors are ignored. With nothing attempted the run failed.
    pub fn derive_status(connectors: &[ConnectorRunStatus]) -> RunStatus {
        let succeeded = connectors
            .iter()
            .filter(|c| c.outcome == ConnectorOutcome::Succeeded)
            .count();
        let failed = connectors
            .iter()
            .filter(|c| c.outcome == ConnectorOutcome::Failed)
            .count();

        match (succeeded, failed) {
            (0, _) => RunStatus::Failed,
            (_, 0) => RunStatus::Success,
            _ => RunStatus::Partial,
        }
    }

    /// Record connector results and move Running → terminal state
    pub fn finish(&mut self, connectors: Vec<ConnectorRunStatus>) -> RunStatus {
        let status = Self::derive_status(&connectors);
        self.connectors = connectors;
        self.transition_to(status);
        self.status
    }

    pub fn total_upserted(&self) -> u64 {
        self.connectors.iter().map(|c| c.records_upserted).sum()
    }
}
