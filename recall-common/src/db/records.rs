//! Recall record persistence
//!
//! Writes are per natural key: the record row and its trigram rows change in
//! one transaction. The upsert only applies when the incoming observation is
//! at least as recent as the stored one (`last_seen_at`), so a slow connector
//! cannot roll a record back to older content.

use super::{format_date, format_timestamp, parse_optional_date, parse_timestamp};
use crate::identifiers::barcode_variants;
use crate::models::{NaturalKey, RecallRecord};
use crate::trigram;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Columns written from record content, in bind order
const CONTENT_COLUMNS: &[&str] = &[
    "upc",
    "gtin",
    "model_number",
    "lot_number",
    "batch_number",
    "serial_number",
    "vin_range",
    "vehicle_make",
    "vehicle_model",
    "vehicle_year",
    "ndc",
    "product_name",
    "brand",
    "manufacturer",
    "description",
    "hazard_description",
    "severity",
    "risk_category",
    "recall_status",
    "recall_date",
    "region",
    "registry_codes",
];

const SELECT_COLUMNS: &str = "id, source_agency, source_record_id, upc, gtin, model_number, \
    lot_number, batch_number, serial_number, vin_range, vehicle_make, vehicle_model, vehicle_year, \
    ndc, product_name, brand, manufacturer, description, hazard_description, severity, \
    risk_category, recall_status, recall_date, ingested_at, last_seen_at, region, registry_codes, \
    dedup_group_id";

/// Keeps each trigram insert under SQLite's bind parameter limit
const TRIGRAM_INSERT_CHUNK: usize = 400;

static UPSERT_SQL: Lazy<String> = Lazy::new(|| {
    let placeholders = vec!["?"; CONTENT_COLUMNS.len()].join(", ");
    let updates = CONTENT_COLUMNS
        .iter()
        .map(|col| format!("{col} = excluded.{col}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO recalls (source_agency, source_record_id, {cols}, ingested_at, last_seen_at, content_hash) \
         VALUES (?, ?, {placeholders}, ?, ?, ?) \
         ON CONFLICT(source_agency, source_record_id) DO UPDATE SET {updates}, \
         last_seen_at = excluded.last_seen_at, content_hash = excluded.content_hash \
         WHERE excluded.last_seen_at >= recalls.last_seen_at \
         RETURNING id",
        cols = CONTENT_COLUMNS.join(", "),
    )
});

static UPDATE_SQL: Lazy<String> = Lazy::new(|| {
    let sets = CONTENT_COLUMNS
        .iter()
        .map(|col| format!("{col} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE recalls SET {sets}, last_seen_at = ?, content_hash = ? \
         WHERE id = ? AND last_seen_at <= ?"
    )
});

/// Stored state needed to decide between insert, update and touch
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingRecord {
    pub id: i64,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Result of a guarded write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub id: i64,
    /// False when a newer observation was already stored and the write was dropped
    pub applied: bool,
}

/// Agency and recall date restrictions shared by every read path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub agencies: Vec<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty() && self.date_from.is_none() && self.date_to.is_none()
    }

    /// Append `AND ...` conditions for this filter; `prefix` qualifies columns (e.g. "r.")
    fn push_conditions<'a>(&self, qb: &mut QueryBuilder<'a, Sqlite>, prefix: &str) {
        if !self.agencies.is_empty() {
            qb.push(format!(" AND {prefix}source_agency COLLATE NOCASE IN ("));
            let mut separated = qb.separated(", ");
            for agency in &self.agencies {
                separated.push_bind(agency.clone());
            }
            separated.push_unseparated(")");
        }
        if let Some(from) = &self.date_from {
            qb.push(format!(" AND {prefix}recall_date >= "));
            qb.push_bind(format_date(from));
        }
        if let Some(to) = &self.date_to {
            qb.push(format!(" AND {prefix}recall_date <= "));
            qb.push_bind(format_date(to));
        }
    }
}

/// Exact identifier lookup; any populated identifier may match (OR)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierQuery {
    /// Normalized barcode digits (matched against `upc` and `gtin` in every padding)
    pub barcode: Option<String>,
    pub model_number: Option<String>,
    pub lot_number: Option<String>,
}

impl IdentifierQuery {
    pub fn is_empty(&self) -> bool {
        self.barcode.is_none() && self.model_number.is_none() && self.lot_number.is_none()
    }
}

/// Identifier columns read by the cross-source matcher
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierRow {
    pub id: i64,
    pub source_agency: String,
    pub upc: Option<String>,
    pub gtin: Option<String>,
    pub model_number: Option<String>,
    pub vin_range: Option<String>,
    pub dedup_group_id: Option<Uuid>,
}

fn bind_content<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    record: &RecallRecord,
    registry_codes: String,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(record.upc.clone())
        .bind(record.gtin.clone())
        .bind(record.model_number.clone())
        .bind(record.lot_number.clone())
        .bind(record.batch_number.clone())
        .bind(record.serial_number.clone())
        .bind(record.vin_range.clone())
        .bind(record.vehicle_make.clone())
        .bind(record.vehicle_model.clone())
        .bind(record.vehicle_year.map(i64::from))
        .bind(record.ndc.clone())
        .bind(record.product_name.clone())
        .bind(record.brand.clone())
        .bind(record.manufacturer.clone())
        .bind(record.description.clone())
        .bind(record.hazard_description.clone())
        .bind(record.severity.clone())
        .bind(record.risk_category.clone())
        .bind(record.recall_status.clone())
        .bind(record.recall_date.as_ref().map(format_date))
        .bind(record.region.clone())
        .bind(registry_codes)
}

fn parse_uuid(column: &str, value: Option<String>) -> Result<Option<Uuid>> {
    value
        .map(|v| {
            Uuid::parse_str(&v)
                .map_err(|e| Error::Internal(format!("Failed to parse {} '{}': {}", column, v, e)))
        })
        .transpose()
}

fn record_from_row(row: &SqliteRow) -> Result<RecallRecord> {
    let registry_codes: String = row.try_get("registry_codes")?;
    let ingested_at: String = row.try_get("ingested_at")?;
    let last_seen_at: String = row.try_get("last_seen_at")?;
    let vehicle_year: Option<i64> = row.try_get("vehicle_year")?;

    Ok(RecallRecord {
        id: Some(row.try_get("id")?),
        source_agency: row.try_get("source_agency")?,
        source_record_id: row.try_get("source_record_id")?,
        upc: row.try_get("upc")?,
        gtin: row.try_get("gtin")?,
        model_number: row.try_get("model_number")?,
        lot_number: row.try_get("lot_number")?,
        batch_number: row.try_get("batch_number")?,
        serial_number: row.try_get("serial_number")?,
        vin_range: row.try_get("vin_range")?,
        vehicle_make: row.try_get("vehicle_make")?,
        vehicle_model: row.try_get("vehicle_model")?,
        vehicle_year: vehicle_year.and_then(|y| i32::try_from(y).ok()),
        ndc: row.try_get("ndc")?,
        product_name: row.try_get("product_name")?,
        brand: row.try_get("brand")?,
        manufacturer: row.try_get("manufacturer")?,
        description: row.try_get("description")?,
        hazard_description: row.try_get("hazard_description")?,
        severity: row.try_get("severity")?,
        risk_category: row.try_get("risk_category")?,
        recall_status: row.try_get("recall_status")?,
        recall_date: parse_optional_date(row.try_get("recall_date")?)?,
        ingested_at: parse_timestamp("ingested_at", &ingested_at)?,
        last_seen_at: parse_timestamp("last_seen_at", &last_seen_at)?,
        region: row.try_get("region")?,
        registry_codes: serde_json::from_str(&registry_codes)?,
        dedup_group_id: parse_uuid("dedup_group_id", row.try_get("dedup_group_id")?)?,
    })
}

/// Union of trigrams over the searchable fields of a record
pub fn record_trigrams(record: &RecallRecord) -> BTreeSet<String> {
    record
        .searchable_fields()
        .into_iter()
        .flatten()
        .flat_map(trigram::trigrams)
        .collect()
}

async fn replace_trigrams(
    conn: &mut SqliteConnection,
    recall_id: i64,
    grams: &BTreeSet<String>,
) -> Result<()> {
    sqlx::query("DELETE FROM recall_trigrams WHERE recall_id = ?")
        .bind(recall_id)
        .execute(&mut *conn)
        .await?;

    let grams: Vec<&String> = grams.iter().collect();
    for chunk in grams.chunks(TRIGRAM_INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO recall_trigrams (trigram, recall_id) ");
        qb.push_values(chunk.iter(), |mut b, gram| {
            b.push_bind((*gram).clone()).push_bind(recall_id);
        });
        qb.build().execute(&mut *conn).await?;
    }

    Ok(())
}

/// Look up the stored bookkeeping for a natural key
pub async fn find_existing(pool: &SqlitePool, key: &NaturalKey) -> Result<Option<ExistingRecord>> {
    let row = sqlx::query(
        "SELECT id, content_hash, ingested_at, last_seen_at FROM recalls \
         WHERE source_agency = ? AND source_record_id = ?",
    )
    .bind(&key.source_agency)
    .bind(&key.source_record_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let ingested_at: String = row.try_get("ingested_at")?;
        let last_seen_at: String = row.try_get("last_seen_at")?;
        Ok(ExistingRecord {
            id: row.try_get("id")?,
            content_hash: row.try_get("content_hash")?,
            ingested_at: parse_timestamp("ingested_at", &ingested_at)?,
            last_seen_at: parse_timestamp("last_seen_at", &last_seen_at)?,
        })
    })
    .transpose()
}

/// Insert a record, or update it in place if another writer created the key first.
///
/// The conflict branch only applies when `record.last_seen_at` is not older
/// than the stored value. Trigram rows are rewritten in the same transaction.
pub async fn insert_record(
    pool: &SqlitePool,
    record: &RecallRecord,
    content_hash: &str,
) -> Result<WriteOutcome> {
    let registry_codes = serde_json::to_string(&record.registry_codes)?;
    let mut tx = pool.begin().await?;

    let query = sqlx::query(UPSERT_SQL.as_str())
        .bind(record.source_agency.clone())
        .bind(record.source_record_id.clone());
    let row = bind_content(query, record, registry_codes)
        .bind(format_timestamp(&record.ingested_at))
        .bind(format_timestamp(&record.last_seen_at))
        .bind(content_hash.to_string())
        .fetch_optional(&mut *tx)
        .await?;

    let outcome = match row {
        Some(row) => {
            let id: i64 = row.try_get("id")?;
            replace_trigrams(&mut tx, id, &record_trigrams(record)).await?;
            WriteOutcome { id, applied: true }
        }
        None => {
            let id: i64 = sqlx::query_scalar(
                "SELECT id FROM recalls WHERE source_agency = ? AND source_record_id = ?",
            )
            .bind(&record.source_agency)
            .bind(&record.source_record_id)
            .fetch_one(&mut *tx)
            .await?;
            debug!(key = %record.natural_key(), "Stored observation is newer, insert dropped");
            WriteOutcome { id, applied: false }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Overwrite the content of an existing row (ingested_at and dedup group are kept)
pub async fn update_record(
    pool: &SqlitePool,
    id: i64,
    record: &RecallRecord,
    content_hash: &str,
) -> Result<WriteOutcome> {
    let registry_codes = serde_json::to_string(&record.registry_codes)?;
    let last_seen_at = format_timestamp(&record.last_seen_at);
    let mut tx = pool.begin().await?;

    let result = bind_content(sqlx::query(UPDATE_SQL.as_str()), record, registry_codes)
        .bind(last_seen_at.clone())
        .bind(content_hash.to_string())
        .bind(id)
        .bind(last_seen_at)
        .execute(&mut *tx)
        .await?;

    let applied = result.rows_affected() > 0;
    if applied {
        replace_trigrams(&mut tx, id, &record_trigrams(record)).await?;
    } else {
        debug!(key = %record.natural_key(), "Stored observation is newer, update dropped");
    }

    tx.commit().await?;
    Ok(WriteOutcome { id, applied })
}

/// Advance `last_seen_at` without touching content
pub async fn touch_record(pool: &SqlitePool, id: i64, seen_at: DateTime<Utc>) -> Result<bool> {
    let seen_at = format_timestamp(&seen_at);
    let result = sqlx::query("UPDATE recalls SET last_seen_at = ? WHERE id = ? AND last_seen_at < ?")
        .bind(&seen_at)
        .bind(id)
        .bind(&seen_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<RecallRecord>> {
    let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM recalls WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn get_by_key(pool: &SqlitePool, key: &NaturalKey) -> Result<Option<RecallRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM recalls WHERE source_agency = ? AND source_record_id = ?"
    ))
    .bind(&key.source_agency)
    .bind(&key.source_record_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Load records by row id; missing ids are simply absent from the map
pub async fn get_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<HashMap<i64, RecallRecord>> {
    let mut records = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(TRIGRAM_INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM recalls WHERE id IN ("));
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        for row in qb.build().fetch_all(pool).await? {
            let record = record_from_row(&row)?;
            if let Some(id) = record.id {
                records.insert(id, record);
            }
        }
    }
    Ok(records)
}

/// Records matching any populated identifier, newest recall first
pub async fn find_by_identifiers(
    pool: &SqlitePool,
    query: &IdentifierQuery,
    filter: &RecordFilter,
) -> Result<Vec<RecallRecord>> {
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM recalls WHERE ("));
    let mut clauses = 0;

    if let Some(barcode) = &query.barcode {
        let variants = barcode_variants(barcode);
        for column in ["upc", "gtin"] {
            if clauses > 0 {
                qb.push(" OR ");
            }
            clauses += 1;
            qb.push(format!("{column} IN ("));
            let mut separated = qb.separated(", ");
            for variant in &variants {
                separated.push_bind(variant.clone());
            }
            separated.push_unseparated(")");
        }
    }
    if let Some(model) = &query.model_number {
        if clauses > 0 {
            qb.push(" OR ");
        }
        clauses += 1;
        qb.push("model_number = ");
        qb.push_bind(model.clone());
        qb.push(" COLLATE NOCASE");
    }
    if let Some(lot) = &query.lot_number {
        if clauses > 0 {
            qb.push(" OR ");
        }
        clauses += 1;
        qb.push("lot_number = ");
        qb.push_bind(lot.clone());
        qb.push(" COLLATE NOCASE");
    }
    qb.push(")");

    filter.push_conditions(&mut qb, "");
    qb.push(" ORDER BY recall_date IS NULL, recall_date DESC, id DESC");

    qb.build()
        .fetch_all(pool)
        .await?
        .iter()
        .map(record_from_row)
        .collect()
}

/// Candidate ids sharing at least one trigram with the query, most shared first
pub async fn trigram_candidates(
    pool: &SqlitePool,
    grams: &BTreeSet<String>,
    filter: &RecordFilter,
    limit: i64,
) -> Result<Vec<i64>> {
    if grams.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT t.recall_id AS recall_id, COUNT(*) AS shared FROM recall_trigrams t \
         JOIN recalls r ON r.id = t.recall_id WHERE t.trigram IN (",
    );
    let mut separated = qb.separated(", ");
    for gram in grams {
        separated.push_bind(gram.clone());
    }
    separated.push_unseparated(")");

    filter.push_conditions(&mut qb, "r.");
    qb.push(" GROUP BY t.recall_id ORDER BY shared DESC, t.recall_id DESC LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| row.try_get::<i64, _>("recall_id").map_err(Error::from))
        .collect()
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_substring_predicate<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    pattern: &str,
    filter: &RecordFilter,
    exclude: &[i64],
) {
    qb.push(" WHERE (");
    for (i, column) in ["product_name", "brand", "description", "hazard_description"]
        .iter()
        .enumerate()
    {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(format!("{column} LIKE "));
        qb.push_bind(pattern.to_string());
        qb.push(" ESCAPE '\\'");
    }
    qb.push(")");

    if !exclude.is_empty() {
        qb.push(" AND id NOT IN (");
        let mut separated = qb.separated(", ");
        for id in exclude {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }
    filter.push_conditions(qb, "");
}

/// Case-insensitive substring match over the searchable fields (no trigram index needed)
///
/// Returns (total matching, page), newest recall first.
///
/// # Arguments
/// * `exclude` - Row ids left out of both the count and the page
pub async fn substring_matches(
    pool: &SqlitePool,
    needle: &str,
    filter: &RecordFilter,
    exclude: &[i64],
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<RecallRecord>)> {
    let pattern = format!("%{}%", escape_like(needle.trim()));

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM recalls");
    push_substring_predicate(&mut count_qb, &pattern, filter, exclude);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM recalls"));
    push_substring_predicate(&mut qb, &pattern, filter, exclude);
    qb.push(" ORDER BY recall_date IS NULL, recall_date DESC, id DESC LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let records = qb
        .build()
        .fetch_all(pool)
        .await?
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok((total, records))
}

/// Filtered listing, newest recall first. Returns (total matching, page).
pub async fn browse(
    pool: &SqlitePool,
    filter: &RecordFilter,
    limit: i64,
    offset: i64,
) -> Result<(i64, Vec<RecallRecord>)> {
    let mut count_qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT COUNT(*) FROM recalls WHERE 1 = 1");
    filter.push_conditions(&mut count_qb, "");
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM recalls WHERE 1 = 1"));
    filter.push_conditions(&mut qb, "");
    qb.push(" ORDER BY recall_date IS NULL, recall_date DESC, id DESC LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let records = qb
        .build()
        .fetch_all(pool)
        .await?
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok((total, records))
}

pub async fn count_records(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recalls")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// True when the trigram index table exists
pub async fn trigram_index_available(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'recall_trigrams'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Recreate the trigram index from stored records. Returns records indexed.
pub async fn rebuild_trigram_index(pool: &SqlitePool) -> Result<u64> {
    super::init::create_schema(pool).await?;

    let rows = sqlx::query(
        "SELECT id, product_name, brand, description, hazard_description FROM recalls ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM recall_trigrams")
        .execute(&mut *tx)
        .await?;

    let mut indexed = 0u64;
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let mut grams = BTreeSet::new();
        for column in ["product_name", "brand", "description", "hazard_description"] {
            let value: Option<String> = row.try_get(column)?;
            if let Some(value) = value {
                grams.extend(trigram::trigrams(&value));
            }
        }
        replace_trigrams(&mut tx, id, &grams).await?;
        indexed += 1;
    }

    tx.commit().await?;
    Ok(indexed)
}

/// Every record carrying an identifier the cross-source matcher keys on
pub async fn identifier_rows(pool: &SqlitePool) -> Result<Vec<IdentifierRow>> {
    let rows = sqlx::query(
        "SELECT id, source_agency, upc, gtin, model_number, vin_range, dedup_group_id FROM recalls \
         WHERE upc IS NOT NULL OR gtin IS NOT NULL OR model_number IS NOT NULL OR vin_range IS NOT NULL \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(IdentifierRow {
                id: row.try_get("id")?,
                source_agency: row.try_get("source_agency")?,
                upc: row.try_get("upc")?,
                gtin: row.try_get("gtin")?,
                model_number: row.try_get("model_number")?,
                vin_range: row.try_get("vin_range")?,
                dedup_group_id: parse_uuid("dedup_group_id", row.try_get("dedup_group_id")?)?,
            })
        })
        .collect()
}

/// Assign `group` to the given records. Returns rows whose group changed.
pub async fn assign_dedup_group(pool: &SqlitePool, ids: &[i64], group: Uuid) -> Result<u64> {
    let group = group.to_string();
    let mut changed = 0;
    for chunk in ids.chunks(TRIGRAM_INSERT_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE recalls SET dedup_group_id = ");
        qb.push_bind(group.clone());
        qb.push(" WHERE (dedup_group_id IS NULL OR dedup_group_id != ");
        qb.push_bind(group.clone());
        qb.push(") AND id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        changed += qb.build().execute(pool).await?.rows_affected();
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("crib"), "crib");
    }

    #[test]
    fn test_upsert_sql_binds_match_columns() {
        let placeholders = UPSERT_SQL.matches('?').count();
        assert_eq!(placeholders, CONTENT_COLUMNS.len() + 5);
        let placeholders = UPDATE_SQL.matches('?').count();
        assert_eq!(placeholders, CONTENT_COLUMNS.len() + 4);
    }

    #[test]
    fn test_record_trigrams_cover_searchable_fields() {
        let mut record = RecallRecord::new("CPSC", "1", Utc::now());
        record.product_name = Some("Crib".to_string());
        record.hazard_description = Some("fall".to_string());
        let grams = record_trigrams(&record);
        assert!(grams.contains("cri"));
        assert!(grams.contains("fal"));
    }
}
