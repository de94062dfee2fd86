//! Canonical data models

pub mod connector_health;
pub mod ingestion_run;
pub mod recall_record;

pub use connector_health::{ConnectorHealth, HealthStatus};
pub use ingestion_run::{ConnectorOutcome, ConnectorRunStatus, IngestionRun, RunStatus};
pub use recall_record::{NaturalKey, RecallRecord};
