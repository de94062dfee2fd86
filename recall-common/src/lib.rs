//! # Recall Common Library
//!
//! Shared code for the recall ingestion and query crates:
//! - Canonical recall record, ingestion run and connector health models
//! - Configuration loading (TOML + environment + OS defaults)
//! - SQLite persistence layer (schema, record upserts, run log, breaker state)
//! - Trigram similarity used by both the search index and the matcher

pub mod config;
pub mod db;
pub mod error;
pub mod identifiers;
pub mod models;
pub mod trigram;

pub use error::{Error, Result};
pub use models::{
    ConnectorHealth, ConnectorOutcome, ConnectorRunStatus, HealthStatus, IngestionRun,
    NaturalKey, RecallRecord, RunStatus,
};
