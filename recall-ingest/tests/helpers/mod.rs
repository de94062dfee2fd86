//! Test Helper Utilities
//!
//! Temporary databases, test configuration and a scripted in-process
//! connector for orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use recall_common::config::RecallConfig;
use recall_common::db::init_database;
use recall_ingest::{Connector, ConnectorError, RawRecord, RecordStream};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("test_recall.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Configuration with one `[[connectors]]` entry per `(name, agency)`.
/// Backoff is shortened so retry tests finish quickly.
pub fn test_config(connectors: &[(&str, &str)], ingest_extra: &str) -> RecallConfig {
    let mut toml = format!(
        r#"
        [ingest]
        backoff_base_ms = 1
        backoff_max_ms = 5
        timeout_secs = 5
        {ingest_extra}
        "#
    );

    for (name, agency) in connectors {
        toml.push_str(&format!(
            r#"
            [[connectors]]
            name = "{name}"
            agency = "{agency}"
            kind = "file_dump"
            endpoint = "unused"

            [connectors.field_mapping]
            source_record_id = "id"
            upc = "upc"
            model_number = "model"
            product_name = "name"
            brand = "brand"
            hazard_description = "hazard"
            recall_date = "date"
            "#
        ));
    }

    RecallConfig::from_toml_str(&toml).unwrap()
}

/// Raw source record in the shape `test_config` maps
pub fn raw_recall(id: &str, upc: Option<&str>, name: &str, brand: &str, date: &str) -> Value {
    let mut value = json!({
        "id": id,
        "name": name,
        "brand": brand,
        "date": date,
    });
    if let Some(upc) = upc {
        value["upc"] = json!(upc);
    }
    value
}

/// What one `fetch` call does
#[derive(Debug, Clone)]
pub enum Script {
    Records(Vec<Value>),
    Transient,
    Permanent,
    /// Never yields; only a timeout ends the fetch
    Hang,
}

/// Scripted connector: each fetch consumes the next queued script, then
/// repeats the fallback.
pub struct MockConnector {
    name: String,
    agency: String,
    queued: Mutex<VecDeque<Script>>,
    fallback: Mutex<Script>,
    fetch_calls: AtomicU32,
    healthy: AtomicBool,
}

impl MockConnector {
    pub fn new(name: &str, agency: &str, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            agency: agency.to_string(),
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            fetch_calls: AtomicU32::new(0),
            healthy: AtomicBool::new(false),
        })
    }

    pub fn queue(&self, script: Script) {
        self.queued.lock().unwrap().push_back(script);
    }

    pub fn set_fallback(&self, script: Script) {
        *self.fallback.lock().unwrap() = script;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn agency(&self) -> &str {
        &self.agency
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<RecordStream, ConnectorError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        match self.next_script() {
            Script::Records(records) => Ok(Box::pin(stream::iter(
                records.into_iter().map(|value| Ok(RawRecord::new(value))),
            ))),
            Script::Transient => Err(ConnectorError::Transient("HTTP 503: unavailable".to_string())),
            Script::Permanent => Err(ConnectorError::Permanent("HTTP 401: unauthorized".to_string())),
            Script::Hang => Ok(Box::pin(stream::pending())),
        }
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectorError::Transient("still unreachable".to_string()))
        }
    }
}

/// Calls currently inside `fetch` across a set of connectors, and the most seen at once
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Connector whose fetch holds a slot in a shared `InFlight` for `delay`,
/// then yields no records
pub struct SlowConnector {
    name: String,
    agency: String,
    delay: Duration,
    in_flight: Arc<InFlight>,
}

impl SlowConnector {
    pub fn new(name: &str, agency: &str, delay: Duration, in_flight: Arc<InFlight>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            agency: agency.to_string(),
            delay,
            in_flight,
        })
    }
}

#[async_trait]
impl Connector for SlowConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn agency(&self) -> &str {
        &self.agency
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<RecordStream, ConnectorError> {
        let now = self.in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.current.fetch_sub(1, Ordering::SeqCst);
        Ok(Box::pin(stream::empty()))
    }
}

/// Upcast for `Orchestrator::with_connectors`
pub fn as_dyn(connectors: &[&Arc<MockConnector>]) -> Vec<Arc<dyn Connector>> {
    connectors
        .iter()
        .map(|c| Arc::clone(*c) as Arc<dyn Connector>)
        .collect()
}
