//! Canonical record normalizer
//!
//! Applies a source's declarative field-mapping table to a raw record. The
//! same code serves every source; only the table differs.
//!
//! Fails closed: a record without `source_record_id`, or with neither a
//! usable identifier nor a product name/brand pair, is rejected. Barcodes
//! that are not 6-14 digits are dropped from the record, not the record.

use crate::connectors::RawRecord;
use crate::error::NormalizationError;
use crate::json_path;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use recall_common::config::{Coercion, ConnectorConfig, FieldRule};
use recall_common::identifiers::normalize_barcode;
use recall_common::RecallRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
const MIN_YEAR: i32 = 1886;
const MAX_YEAR: i32 = 2100;
/// Numeric timestamps above this are milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Field-mapping normalizer for one source
#[derive(Debug, Clone)]
pub struct Normalizer {
    agency: String,
    region: Option<String>,
    mapping: BTreeMap<String, FieldRule>,
}

impl Normalizer {
    pub fn new(
        agency: impl Into<String>,
        region: Option<String>,
        mapping: BTreeMap<String, FieldRule>,
    ) -> Self {
        Self {
            agency: agency.into(),
            region,
            mapping,
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(&config.agency, config.region.clone(), config.field_mapping.clone())
    }

    /// Map a raw source record onto the canonical schema
    ///
    /// # Arguments
    /// * `raw` - Record as published by the source
    /// * `observed_at` - Fetch time, used for `ingested_at` and `last_seen_at`
    pub fn normalize(
        &self,
        raw: &RawRecord,
        observed_at: DateTime<Utc>,
    ) -> Result<RecallRecord, NormalizationError> {
        let source = raw.value();
        if !source.is_object() {
            return Err(NormalizationError::NotAnObject);
        }

        let source_record_id = self
            .text(source, "source_record_id")
            .ok_or(NormalizationError::MissingSourceRecordId)?;

        let mut record = RecallRecord::new(&self.agency, source_record_id, observed_at);

        record.upc = self.barcode(source, "upc", &record.source_record_id);
        record.gtin = self.barcode(source, "gtin", &record.source_record_id);
        record.model_number = self.text(source, "model_number");
        record.lot_number = self.text(source, "lot_number");
        record.batch_number = self.text(source, "batch_number");
        record.serial_number = self.text(source, "serial_number");
        record.vin_range = self.text(source, "vin_range");
        record.vehicle_make = self.text(source, "vehicle_make");
        record.vehicle_model = self.text(source, "vehicle_model");
        record.vehicle_year = self.apply(source, "vehicle_year", |value, _| parse_year(value));
        record.ndc = self.text(source, "ndc");

        record.product_name = self.text(source, "product_name");
        record.brand = self.text(source, "brand");
        record.manufacturer = self.text(source, "manufacturer");
        record.description = self.text(source, "description");
        record.hazard_description = self.text(source, "hazard_description");
        record.severity = self.text(source, "severity");
        record.risk_category = self.text(source, "risk_category");
        record.recall_status = self.text(source, "recall_status");
        record.recall_date = self.apply(source, "recall_date", |value, _| parse_date(value));

        record.region = self.text(source, "region").or_else(|| self.region.clone());
        record.registry_codes = self
            .apply(source, "registry_codes", |value, _| scalar_map(value))
            .unwrap_or_default();

        if !record.has_identifier() && !record.has_name_and_brand() {
            return Err(NormalizationError::NoUsableIdentifier {
                source_record_id: record.source_record_id,
            });
        }

        Ok(record)
    }

    /// Apply the rule for `field`: first path yielding a value wins, then the default
    fn apply<T>(
        &self,
        source: &Value,
        field: &str,
        convert: impl Fn(&Value, Coercion) -> Option<T>,
    ) -> Option<T> {
        let rule = self.mapping.get(field)?;

        rule.paths
            .iter()
            .filter_map(|path| json_path::lookup(source, path))
            .find_map(|value| convert(value, rule.coerce))
            .or_else(|| {
                rule.default
                    .as_ref()
                    .and_then(|default| convert(&Value::String(default.clone()), rule.coerce))
            })
    }

    fn text(&self, source: &Value, field: &str) -> Option<String> {
        self.apply(source, field, coerce_text)
    }

    fn barcode(&self, source: &Value, field: &str, source_record_id: &str) -> Option<String> {
        let raw = self.text(source, field)?;
        let normalized = normalize_barcode(&raw);
        if normalized.is_none() {
            debug!(
                agency = %self.agency,
                source_record_id,
                field,
                value = %raw,
                "Discarding malformed barcode"
            );
        }
        normalized
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => collapse_whitespace(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Text coercions. Arrays are joined for `join` and otherwise yield their
/// first non-empty scalar.
pub fn coerce_text(value: &Value, coerce: Coercion) -> Option<String> {
    let text = match (value, coerce) {
        (Value::Array(items), Coercion::Join) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))?
        }
        (Value::Array(items), _) => {
            return items.iter().find_map(|item| coerce_text(item, coerce));
        }
        (_, Coercion::Date) => return parse_date(value).map(|d| d.format("%Y-%m-%d").to_string()),
        (_, Coercion::Year) => return parse_year(value).map(|y| y.to_string()),
        _ => scalar_text(value)?,
    };

    let coerced = match coerce {
        Coercion::Digits => text.chars().filter(char::is_ascii_digit).collect(),
        Coercion::Upper => text.to_uppercase(),
        _ => text,
    };
    (!coerced.is_empty()).then_some(coerced)
}

fn from_unix(number: i64) -> Option<DateTime<Utc>> {
    if number.abs() >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(number).single()
    } else {
        Utc.timestamp_opt(number, 0).single()
    }
}

/// Microsoft JSON date: `/Date(1700000000000)/` or `/Date(1700000000000-0500)/`
fn parse_ms_json_date(value: &str) -> Option<DateTime<Utc>> {
    let inner = value.strip_prefix("/Date(")?.strip_suffix(")/")?;
    let end = inner
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)
        .unwrap_or(inner.len());
    let millis: i64 = inner[..end].parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse any supported timestamp or date representation
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_unix),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if let Some(ts) = parse_ms_json_date(value) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    // Unix seconds / millis as text (YYYYMMDD was tried above)
    if value.len() >= 9 && value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse().ok().and_then(from_unix);
    }
    None
}

pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    parse_timestamp_value(value).map(|ts| ts.date_naive())
}

pub fn parse_year(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i32>() {
                Ok(year) => Some(year),
                Err(_) => parse_timestamp_str(s).map(|ts| ts.year()),
            }
        }
        _ => None,
    }?;
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
}

fn scalar_map(value: &Value) -> Option<BTreeMap<String, String>> {
    let object = value.as_object()?;
    let map: BTreeMap<String, String> = object
        .iter()
        .filter_map(|(key, v)| scalar_text(v).map(|text| (key.clone(), text)))
        .collect();
    (!map.is_empty()).then_some(map)
}
