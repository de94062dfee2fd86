//! Ingestion run log
//!
//! Append-only: a run is inserted once, after it reaches a terminal state.

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::models::{IngestionRun, RunStatus};
use crate::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Append a finished run to the log
pub async fn record_run(pool: &SqlitePool, run: &IngestionRun) -> Result<()> {
    if !run.status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "Run {} is {} and cannot be recorded before it finishes",
            run.run_id, run.status
        )));
    }

    let connectors = serde_json::to_string(&run.connectors)?;

    sqlx::query(
        r#"
        INSERT INTO ingestion_runs (run_id, status, started_at, finished_at, connectors)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(run.status.as_str())
    .bind(format_timestamp(&run.started_at))
    .bind(run.finished_at.as_ref().map(format_timestamp))
    .bind(connectors)
    .execute(pool)
    .await?;

    Ok(())
}

fn run_from_row(row: &SqliteRow) -> Result<IngestionRun> {
    let run_id: String = row.try_get("run_id")?;
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let connectors: String = row.try_get("connectors")?;

    Ok(IngestionRun {
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| Error::Internal(format!("Failed to parse run_id '{}': {}", run_id, e)))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown run status '{}'", status)))?,
        started_at: parse_timestamp("started_at", &started_at)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
        connectors: serde_json::from_str(&connectors)?,
    })
}

/// Most recently started run, if any
pub async fn latest_run(pool: &SqlitePool) -> Result<Option<IngestionRun>> {
    let row = sqlx::query(
        "SELECT run_id, status, started_at, finished_at, connectors FROM ingestion_runs \
         ORDER BY started_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(run_from_row).transpose()
}

/// Newest runs first
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<IngestionRun>> {
    let rows = sqlx::query(
        "SELECT run_id, status, started_at, finished_at, connectors FROM ingestion_runs \
         ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

pub async fn count_runs(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingestion_runs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
