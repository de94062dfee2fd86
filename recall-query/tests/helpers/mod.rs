//! Test Helper Utilities
//!
//! Temporary recall stores seeded with hand-built records.

#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use recall_common::config::SearchConfig;
use recall_common::db::{init_database, records};
use recall_common::RecallRecord;
use recall_query::QueryService;
use sqlx::SqlitePool;
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

/// Minimal record with a product name and brand
pub fn recall(agency: &str, id: &str, name: &str, brand: &str, date: Option<&str>) -> RecallRecord {
    let observed = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let mut record = RecallRecord::new(agency, id, observed);
    record.product_name = Some(name.to_string());
    record.brand = Some(brand.to_string());
    record.recall_date = date.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap());
    record
}

/// Persist records; returns their row ids in order
pub async fn seed(pool: &SqlitePool, batch: &[RecallRecord]) -> Vec<i64> {
    let mut ids = Vec::with_capacity(batch.len());
    for record in batch {
        let outcome = records::insert_record(pool, record, &record.content_hash())
            .await
            .unwrap();
        ids.push(outcome.id);
    }
    ids
}

pub fn service(pool: &SqlitePool) -> QueryService {
    QueryService::new(pool.clone(), SearchConfig::default())
}

pub fn service_with(pool: &SqlitePool, config: SearchConfig) -> QueryService {
    QueryService::new(pool.clone(), config)
}
