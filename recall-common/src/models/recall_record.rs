//! Canonical recall record
//!
//! Every source payload is normalized into this one shape. The natural key
//! `(source_agency, source_record_id)` is unique across the store; after the
//! first insert only `last_seen_at`, status fields and `dedup_group_id` are
//! expected to move.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Canonical fields a source field-mapping table may populate
pub const MAPPABLE_FIELDS: &[&str] = &[
    "source_record_id",
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

/// Natural key of a recall record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    pub source_agency: String,
    pub source_record_id: String,
}

impl NaturalKey {
    pub fn new(source_agency: impl Into<String>, source_record_id: impl Into<String>) -> Self {
        Self {
            source_agency: source_agency.into(),
            source_record_id: source_record_id.into(),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_agency, self.source_record_id)
    }
}

/// Canonical recall record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallRecord {
    /// Storage row id (None until persisted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Issuing regulatory source (e.g. "CPSC", "NHTSA")
    pub source_agency: String,
    /// Identifier assigned by the source
    pub source_record_id: String,

    // Product identifiers
    pub upc: Option<String>,
    pub gtin: Option<String>,
    pub model_number: Option<String>,
    pub lot_number: Option<String>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub vin_range: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    /// National Drug Code (pharmaceutical recalls)
    pub ndc: Option<String>,

    // Descriptive fields
    pub product_name: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub description: Option<String>,
    pub hazard_description: Option<String>,
    pub severity: Option<String>,
    pub risk_category: Option<String>,
    /// Source-reported status ("Ongoing", "Terminated", ...)
    pub recall_status: Option<String>,

    // Temporal fields
    pub recall_date: Option<NaiveDate>,
    pub ingested_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,

    // Regional metadata
    pub region: Option<String>,
    #[serde(default)]
    pub registry_codes: BTreeMap<String, String>,

    /// Shared by records from different sources describing the same recall
    pub dedup_group_id: Option<Uuid>,
}

/// Fields that take part in change detection. Timestamps, the row id and the
/// dedup group are bookkeeping and deliberately excluded.
#[derive(Serialize)]
struct ContentView<'a> {
    upc: &'a Option<String>,
    gtin: &'a Option<String>,
    model_number: &'a Option<String>,
    lot_number: &'a Option<String>,
    batch_number: &'a Option<String>,
    serial_number: &'a Option<String>,
    vin_range: &'a Option<String>,
    vehicle_make: &'a Option<String>,
    vehicle_model: &'a Option<String>,
    vehicle_year: &'a Option<i32>,
    ndc: &'a Option<String>,
    product_name: &'a Option<String>,
    brand: &'a Option<String>,
    manufacturer: &'a Option<String>,
    description: &'a Option<String>,
    hazard_description: &'a Option<String>,
    severity: &'a Option<String>,
    risk_category: &'a Option<String>,
    recall_status: &'a Option<String>,
    recall_date: &'a Option<NaiveDate>,
    region: &'a Option<String>,
    registry_codes: &'a BTreeMap<String, String>,
}

impl RecallRecord {
    /// Create an empty record for the given natural key, observed at `observed_at`
    pub fn new(
        source_agency: impl Into<String>,
        source_record_id: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            source_agency: source_agency.into(),
            source_record_id: source_record_id.into(),
            upc: None,
            gtin: None,
            model_number: None,
            lot_number: None,
            batch_number: None,
            serial_number: None,
            vin_range: None,
            vehicle_make: None,
            vehicle_model: None,
            vehicle_year: None,
            ndc: None,
            product_name: None,
            brand: None,
            manufacturer: None,
            description: None,
            hazard_description: None,
            severity: None,
            risk_category: None,
            recall_status: None,
            recall_date: None,
            ingested_at: observed_at,
            last_seen_at: observed_at,
            region: None,
            registry_codes: BTreeMap::new(),
            dedup_group_id: None,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.source_agency, &self.source_record_id)
    }

    /// True if at least one product identifier is populated
    pub fn has_identifier(&self) -> bool {
        [
            &self.upc,
            &self.gtin,
            &self.model_number,
            &self.lot_number,
            &self.batch_number,
            &self.serial_number,
            &self.vin_range,
            &self.ndc,
        ]
        .iter()
        .any(|value| value.as_deref().is_some_and(|v| !v.trim().is_empty()))
            || (self.vehicle_make.is_some() && self.vehicle_model.is_some() && self.vehicle_year.is_some())
    }

    /// True if both product name and brand are populated
    pub fn has_name_and_brand(&self) -> bool {
        let filled = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
        filled(&self.product_name) && filled(&self.brand)
    }

    /// Text fields covered by the fuzzy search index, in scoring order
    pub fn searchable_fields(&self) -> [Option<&str>; 4] {
        [
            self.product_name.as_deref(),
            self.brand.as_deref(),
            self.description.as_deref(),
            self.hazard_description.as_deref(),
        ]
    }

    /// SHA-256 (hex) over the content fields
    pub fn content_hash(&self) -> String {
        let view = ContentView {
            upc: &self.upc,
            gtin: &self.gtin,
            model_number: &self.model_number,
            lot_number: &self.lot_number,
            batch_number: &self.batch_number,
            serial_number: &self.serial_number,
            vin_range: &self.vin_range,
            vehicle_make: &self.vehicle_make,
            vehicle_model: &self.vehicle_model,
            vehicle_year: &self.vehicle_year,
            ndc: &self.ndc,
            product_name: &self.product_name,
            brand: &self.brand,
            manufacturer: &self.manufacturer,
            description: &self.description,
            hazard_description: &self.hazard_description,
            severity: &self.severity,
            risk_category: &self.risk_category,
            recall_status: &self.recall_status,
            recall_date: &self.recall_date,
            region: &self.region,
            registry_codes: &self.registry_codes,
        };

        // Serializing plain strings, numbers and a BTreeMap cannot fail.
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }
}
