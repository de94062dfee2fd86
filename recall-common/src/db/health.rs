//! Connector health persistence (circuit breaker state and watermark)

use super::{format_timestamp, parse_optional_timestamp};
use crate::models::{ConnectorHealth, HealthStatus};
use crate::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

fn health_from_row(row: &SqliteRow) -> Result<ConnectorHealth> {
    let status: String = row.try_get("status")?;
    let consecutive_failures: i64 = row.try_get("consecutive_failures")?;

    Ok(ConnectorHealth {
        name: row.try_get("name")?,
        status: HealthStatus::parse(&status),
        consecutive_failures: u32::try_from(consecutive_failures).unwrap_or(u32::MAX),
        last_success_at: parse_optional_timestamp("last_success_at", row.try_get("last_success_at")?)?,
        last_failure_at: parse_optional_timestamp("last_failure_at", row.try_get("last_failure_at")?)?,
        last_error: row.try_get("last_error")?,
        watermark: parse_optional_timestamp("watermark", row.try_get("watermark")?)?,
        last_attempt_at: parse_optional_timestamp("last_attempt_at", row.try_get("last_attempt_at")?)?,
    })
}

/// Load a connector's health; a connector never seen before is healthy with no watermark
pub async fn load_health(pool: &SqlitePool, name: &str) -> Result<ConnectorHealth> {
    let row = sqlx::query("SELECT * FROM connector_health WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => health_from_row(&row),
        None => Ok(ConnectorHealth::new(name)),
    }
}

pub async fn all_health(pool: &SqlitePool) -> Result<Vec<ConnectorHealth>> {
    let rows = sqlx::query("SELECT * FROM connector_health ORDER BY name")
        .fetch_all(pool)
        .await?;
    rows.iter().map(health_from_row).collect()
}

pub async fn save_health(pool: &SqlitePool, health: &ConnectorHealth) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO connector_health (
            name, status, consecutive_failures, last_success_at, last_failure_at,
            last_error, watermark, last_attempt_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            status = excluded.status,
            consecutive_failures = excluded.consecutive_failures,
            last_success_at = excluded.last_success_at,
            last_failure_at = excluded.last_failure_at,
            last_error = excluded.last_error,
            watermark = excluded.watermark,
            last_attempt_at = excluded.last_attempt_at
        "#,
    )
    .bind(&health.name)
    .bind(health.status.as_str())
    .bind(i64::from(health.consecutive_failures))
    .bind(health.last_success_at.as_ref().map(format_timestamp))
    .bind(health.last_failure_at.as_ref().map(format_timestamp))
    .bind(&health.last_error)
    .bind(health.watermark.as_ref().map(format_timestamp))
    .bind(health.last_attempt_at.as_ref().map(format_timestamp))
    .execute(pool)
    .await?;

    Ok(())
}
