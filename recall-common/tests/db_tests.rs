//! Persistence layer tests against a temporary SQLite database

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use recall_common::db::{health, init_database, records, runs, IdentifierQuery, RecordFilter};
use recall_common::models::{ConnectorOutcome, ConnectorRunStatus};
use recall_common::{ConnectorHealth, HealthStatus, IngestionRun, RecallRecord, RunStatus};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

async fn test_pool() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("recall.db")).await.unwrap();
    (dir, pool)
}

fn crib(agency: &str, id: &str, upc: &str) -> RecallRecord {
    let observed = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut record = RecallRecord::new(agency, id, observed);
    record.upc = Some(upc.to_string());
    record.product_name = Some("Convertible Baby Crib".to_string());
    record.brand = Some("SleepWell".to_string());
    record.hazard_description = Some("Slats can detach, posing an entrapment hazard".to_string());
    record.recall_date = NaiveDate::from_ymd_opt(2024, 2, 20);
    record
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("recall.db");

    let pool = init_database(&db_path).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("recall.db");

    let first = init_database(&db_path).await.unwrap();
    records::insert_record(&first, &crib("CPSC", "1", "012914632109"), "h1")
        .await
        .unwrap();
    drop(first);

    let second = init_database(&db_path).await.unwrap();
    assert_eq!(records::count_records(&second).await.unwrap(), 1);
    assert!(records::trigram_index_available(&second).await.unwrap());
}

#[tokio::test]
async fn test_insert_then_read_back() {
    let (_dir, pool) = test_pool().await;
    let mut record = crib("CPSC", "24-101", "012914632109");
    record.vehicle_year = Some(2021);
    record.registry_codes.insert("eu_rapex".to_string(), "A12/0001/24".to_string());

    let written = records::insert_record(&pool, &record, &record.content_hash())
        .await
        .unwrap();
    assert!(written.applied);

    let stored = records::get_by_key(&pool, &record.natural_key())
        .await
        .unwrap()
        .expect("record stored");
    assert_eq!(stored.id, Some(written.id));
    assert_eq!(stored.vehicle_year, Some(2021));
    assert_eq!(stored.registry_codes.get("eu_rapex").map(String::as_str), Some("A12/0001/24"));
    assert_eq!(stored.content_hash(), record.content_hash());

    let existing = records::find_existing(&pool, &record.natural_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(existing.content_hash, record.content_hash());
}

#[tokio::test]
async fn test_older_observation_does_not_overwrite_newer() {
    let (_dir, pool) = test_pool().await;
    let mut newer = crib("CPSC", "1", "012914632109");
    newer.last_seen_at = newer.last_seen_at + Duration::hours(2);
    newer.recall_status = Some("Terminated".to_string());
    let id = records::insert_record(&pool, &newer, &newer.content_hash())
        .await
        .unwrap()
        .id;

    let mut older = crib("CPSC", "1", "012914632109");
    older.recall_status = Some("Ongoing".to_string());

    let outcome = records::update_record(&pool, id, &older, &older.content_hash())
        .await
        .unwrap();
    assert!(!outcome.applied);

    let racing_insert = records::insert_record(&pool, &older, &older.content_hash())
        .await
        .unwrap();
    assert_eq!(racing_insert.id, id);
    assert!(!racing_insert.applied);

    let stored = records::get_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(stored.recall_status.as_deref(), Some("Terminated"));
}

#[tokio::test]
async fn test_touch_only_advances_last_seen() {
    let (_dir, pool) = test_pool().await;
    let record = crib("CPSC", "1", "012914632109");
    let id = records::insert_record(&pool, &record, "h").await.unwrap().id;

    let later = record.last_seen_at + Duration::days(1);
    assert!(records::touch_record(&pool, id, later).await.unwrap());
    assert!(!records::touch_record(&pool, id, record.last_seen_at).await.unwrap());

    let stored = records::get_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(stored.last_seen_at, later);
    assert_eq!(stored.ingested_at, record.ingested_at);
}

#[tokio::test]
async fn test_identifier_lookup_matches_any_padding() {
    let (_dir, pool) = test_pool().await;
    records::insert_record(&pool, &crib("CPSC", "1", "012914632109"), "a")
        .await
        .unwrap();
    let mut eu = crib("EU_SAFETY_GATE", "A12/1", "0");
    eu.upc = None;
    eu.gtin = Some("0012914632109".to_string());
    records::insert_record(&pool, &eu, "b").await.unwrap();
    records::insert_record(&pool, &crib("FDA", "9", "099999999999"), "c")
        .await
        .unwrap();

    let query = IdentifierQuery {
        barcode: Some("12914632109".to_string()),
        ..Default::default()
    };
    let hits = records::find_by_identifiers(&pool, &query, &RecordFilter::default())
        .await
        .unwrap();
    let mut agencies: Vec<_> = hits.iter().map(|r| r.source_agency.as_str()).collect();
    agencies.sort();
    assert_eq!(agencies, vec!["CPSC", "EU_SAFETY_GATE"]);

    let filtered = records::find_by_identifiers(
        &pool,
        &query,
        &RecordFilter {
            agencies: vec!["cpsc".to_string()],
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].source_agency, "CPSC");
}

#[tokio::test]
async fn test_model_number_lookup_is_case_insensitive() {
    let (_dir, pool) = test_pool().await;
    let mut record = crib("CPSC", "1", "012914632109");
    record.model_number = Some("SW-200X".to_string());
    records::insert_record(&pool, &record, "a").await.unwrap();

    let query = IdentifierQuery {
        model_number: Some("sw-200x".to_string()),
        ..Default::default()
    };
    let hits = records::find_by_identifiers(&pool, &query, &RecordFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_trigram_candidates_rank_by_overlap() {
    let (_dir, pool) = test_pool().await;
    let crib_id = records::insert_record(&pool, &crib("CPSC", "1", "012914632109"), "a")
        .await
        .unwrap()
        .id;
    let mut heater = RecallRecord::new("CPSC", "2", Utc::now());
    heater.product_name = Some("Space Heater".to_string());
    let heater_id = records::insert_record(&pool, &heater, "b").await.unwrap().id;

    let grams = recall_common::trigram::trigrams("baby crib");
    let candidates = records::trigram_candidates(&pool, &grams, &RecordFilter::default(), 10)
        .await
        .unwrap();
    assert_eq!(candidates.first(), Some(&crib_id));
    assert!(!candidates.contains(&heater_id));
}

#[tokio::test]
async fn test_rebuild_trigram_index_restores_dropped_table() {
    let (_dir, pool) = test_pool().await;
    records::insert_record(&pool, &crib("CPSC", "1", "012914632109"), "a")
        .await
        .unwrap();

    sqlx::query("DROP TABLE recall_trigrams").execute(&pool).await.unwrap();
    assert!(!records::trigram_index_available(&pool).await.unwrap());

    let indexed = records::rebuild_trigram_index(&pool).await.unwrap();
    assert_eq!(indexed, 1);
    assert!(records::trigram_index_available(&pool).await.unwrap());

    let grams = recall_common::trigram::trigrams("crib");
    let candidates = records::trigram_candidates(&pool, &grams, &RecordFilter::default(), 10)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
}

#[tokio::test]
async fn test_substring_matches_escape_wildcards() {
    let (_dir, pool) = test_pool().await;
    let mut record = crib("CPSC", "1", "012914632109");
    record.description = Some("Sold at 50% off".to_string());
    records::insert_record(&pool, &record, "a").await.unwrap();
    records::insert_record(&pool, &crib("CPSC", "2", "012914632110"), "b")
        .await
        .unwrap();

    let (total, hits) = records::substring_matches(&pool, "50%", &RecordFilter::default(), &[], 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_record_id, "1");

    let (total, hits) = records::substring_matches(&pool, "CRIB", &RecordFilter::default(), &[], 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_substring_matches_count_past_the_page() {
    let (_dir, pool) = test_pool().await;
    let mut ids = Vec::new();
    for i in 0..4 {
        let record = crib("CPSC", &i.to_string(), &format!("01291463210{i}"));
        ids.push(records::insert_record(&pool, &record, "h").await.unwrap().id);
    }

    let (total, page) = records::substring_matches(&pool, "crib", &RecordFilter::default(), &ids[..1], 2, 2)
        .await
        .unwrap();
    // Excluded row is left out of the count as well as the page
    assert_eq!(total, 3);
    assert_eq!(page.len(), 1);
    assert!(page.iter().all(|r| r.id != Some(ids[0])));
}

#[tokio::test]
async fn test_browse_filters_by_date_and_counts() {
    let (_dir, pool) = test_pool().await;
    for (id, day) in [("1", 1), ("2", 10), ("3", 20)] {
        let mut record = crib("CPSC", id, "012914632109");
        record.recall_date = NaiveDate::from_ymd_opt(2024, 1, day);
        records::insert_record(&pool, &record, id).await.unwrap();
    }

    let filter = RecordFilter {
        date_from: NaiveDate::from_ymd_opt(2024, 1, 5),
        ..Default::default()
    };
    let (total, page) = records::browse(&pool, &filter, 1, 0).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].source_record_id, "3");

    let (_, page) = records::browse(&pool, &filter, 1, 1).await.unwrap();
    assert_eq!(page[0].source_record_id, "2");
}

#[tokio::test]
async fn test_assign_dedup_group_reports_changes() {
    let (_dir, pool) = test_pool().await;
    let a = records::insert_record(&pool, &crib("CPSC", "1", "012914632109"), "a")
        .await
        .unwrap()
        .id;
    let b = records::insert_record(&pool, &crib("HC", "1", "012914632109"), "b")
        .await
        .unwrap()
        .id;

    let group = Uuid::new_v4();
    assert_eq!(records::assign_dedup_group(&pool, &[a, b], group).await.unwrap(), 2);
    assert_eq!(records::assign_dedup_group(&pool, &[a, b], group).await.unwrap(), 0);

    let rows = records::identifier_rows(&pool).await.unwrap();
    assert!(rows.iter().all(|row| row.dedup_group_id == Some(group)));
}

#[tokio::test]
async fn test_runs_are_appended_and_read_newest_first() {
    let (_dir, pool) = test_pool().await;

    let mut first = IngestionRun::scheduled();
    first.transition_to(RunStatus::Running);
    first.finish(vec![ConnectorRunStatus {
        connector_name: "cpsc".to_string(),
        outcome: ConnectorOutcome::Succeeded,
        records_fetched: 3,
        records_upserted: 3,
        records_rejected: 0,
        attempts: 1,
        transient: false,
        error: None,
    }]);
    runs::record_run(&pool, &first).await.unwrap();

    let mut second = IngestionRun::scheduled();
    second.transition_to(RunStatus::Running);
    second.started_at = first.started_at + Duration::seconds(5);
    second.finish(Vec::new());
    runs::record_run(&pool, &second).await.unwrap();

    let latest = runs::latest_run(&pool).await.unwrap().unwrap();
    assert_eq!(latest.run_id, second.run_id);
    assert_eq!(latest.status, RunStatus::Failed);

    let recent = runs::recent_runs(&pool, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].connectors[0].records_upserted, 3);
    assert_eq!(runs::count_runs(&pool).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unfinished_run_is_rejected() {
    let (_dir, pool) = test_pool().await;
    let run = IngestionRun::scheduled();
    assert!(runs::record_run(&pool, &run).await.is_err());
    assert_eq!(runs::count_runs(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_health_defaults_and_round_trips() {
    let (_dir, pool) = test_pool().await;

    let fresh = health::load_health(&pool, "cpsc").await.unwrap();
    assert_eq!(fresh, ConnectorHealth::new("cpsc"));

    let mut degraded = fresh.clone();
    degraded.status = HealthStatus::Degraded;
    degraded.consecutive_failures = 3;
    degraded.last_error = Some("HTTP 503".to_string());
    degraded.last_failure_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    health::save_health(&pool, &degraded).await.unwrap();

    let loaded = health::load_health(&pool, "cpsc").await.unwrap();
    assert_eq!(loaded, degraded);
    assert_eq!(health::all_health(&pool).await.unwrap().len(), 1);
}
