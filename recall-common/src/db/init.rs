//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and applies the schema.
//! Schema creation is idempotent and runs on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout; lock errors past this are handled by `retry_on_lock`
const BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them.
    // WAL lets readers (query API) proceed while connectors write.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_recalls_table(pool).await?;
    create_trigram_index_table(pool).await?;
    create_ingestion_runs_table(pool).await?;
    create_connector_health_table(pool).await?;

    info!("Database schema ready (recalls, recall_trigrams, ingestion_runs, connector_health)");
    Ok(())
}

/// Canonical records, unique on the natural key
async fn create_recalls_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recalls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_agency TEXT NOT NULL,
            source_record_id TEXT NOT NULL,
            upc TEXT,
            gtin TEXT,
            model_number TEXT,
            lot_number TEXT,
            batch_number TEXT,
            serial_number TEXT,
            vin_range TEXT,
            vehicle_make TEXT,
            vehicle_model TEXT,
            vehicle_year INTEGER,
            ndc TEXT,
            product_name TEXT,
            brand TEXT,
            manufacturer TEXT,
            description TEXT,
            hazard_description TEXT,
            severity TEXT,
            risk_category TEXT,
            recall_status TEXT,
            recall_date TEXT,
            ingested_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            region TEXT,
            registry_codes TEXT NOT NULL DEFAULT '{}',
            dedup_group_id TEXT,
            content_hash TEXT NOT NULL,
            UNIQUE (source_agency, source_record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_recalls_upc ON recalls(upc)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_gtin ON recalls(gtin)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_model_number ON recalls(model_number COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_lot_number ON recalls(lot_number COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_batch_number ON recalls(batch_number COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_serial_number ON recalls(serial_number COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_vin_range ON recalls(vin_range COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_ndc ON recalls(ndc)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_recall_date ON recalls(recall_date)",
        "CREATE INDEX IF NOT EXISTS idx_recalls_dedup_group ON recalls(dedup_group_id)",
    ];

    for sql in indexes {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

/// Inverted trigram index over product_name, brand, description, hazard_description
async fn create_trigram_index_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recall_trigrams (
            trigram TEXT NOT NULL,
            recall_id INTEGER NOT NULL REFERENCES recalls(id) ON DELETE CASCADE,
            PRIMARY KEY (trigram, recall_id)
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recall_trigrams_recall ON recall_trigrams(recall_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Append-only ingestion run log
async fn create_ingestion_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            run_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            connectors TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingestion_runs_started ON ingestion_runs(started_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Circuit breaker state and fetch watermark per connector
async fn create_connector_health_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connector_health (
            name TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'healthy',
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_success_at TEXT,
            last_failure_at TEXT,
            last_error TEXT,
            watermark TEXT,
            last_attempt_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
