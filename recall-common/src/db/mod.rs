//! Persistence layer
//!
//! SQLite through `sqlx`. Every write is scoped to one natural key (the
//! record row plus its trigram rows), so concurrent connectors never need
//! cross-record locking.

pub mod health;
pub mod init;
pub mod records;
pub mod retry;
pub mod runs;

pub use init::{create_schema, init_database};
pub use records::{IdentifierQuery, RecordFilter};
pub use retry::retry_on_lock;

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Fixed-width RFC 3339 form so stored timestamps sort lexically
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {} '{}': {}", column, value, e)))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

pub(crate) fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_optional_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|e| Error::Internal(format!("Failed to parse recall_date '{}': {}", v, e)))
        })
        .transpose()
}
