//! # Recall Ingest
//!
//! Pulls recall notices from regulator sources, normalizes them into the
//! canonical record and keeps the local store current:
//! - Connectors: paginated JSON APIs and bulk exports
//! - Orchestrator: bounded worker pool, retry with backoff, circuit breaker
//! - Upsert resolver: idempotent writes keyed on `(source_agency, source_record_id)`
//! - Cross-source matcher: links the same product across agencies

pub mod connectors;
pub mod error;
pub mod json_path;
pub mod services;

pub use connectors::{Connector, RawRecord, RecordStream};
pub use error::{ConnectorError, NormalizationError, OrchestratorError};
pub use services::Orchestrator;
