//! Query request and response types

use chrono::NaiveDate;
use recall_common::{ConnectorHealth, IngestionRun, RecallRecord};
use serde::{Deserialize, Serialize};

/// Product identifiers supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierInput {
    pub upc: Option<String>,
    pub model_number: Option<String>,
    pub lot_number: Option<String>,
}

/// One search call. Every field is optional; an empty request browses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    /// Free text matched against product name, brand, description and hazard
    pub query: Option<String>,
    pub identifiers: IdentifierInput,
    /// Restrict to these agencies (case-insensitive)
    pub agencies: Vec<String>,
    /// Inclusive bounds on `recall_date`
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Page size; clamped to `[1, max_limit]`
    pub limit: Option<usize>,
    /// Token from a previous response's `next_cursor`
    pub cursor: Option<String>,
}

/// How a hit was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Identifier lookup
    Exact,
    /// Trigram similarity at or above the threshold
    Fuzzy,
    /// Substring fallback (degraded mode)
    Substring,
    /// No query: filtered listing
    Browse,
}

/// A recall record with its match metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: RecallRecord,
    pub match_kind: MatchKind,
    /// Trigram similarity for fuzzy hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub items: Vec<SearchHit>,
    /// Size of the full result set
    pub total: usize,
    pub offset: usize,
    /// Cursor for the page after this one
    pub next_cursor: String,
    pub has_more: bool,
    /// Free text was answered by substring matching
    pub degraded: bool,
    /// More records shared trigrams with the query than `max_fuzzy_candidates`;
    /// `total` counts only the scored candidates
    pub truncated: bool,
}

/// Last run and per-connector breaker state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionStatus {
    pub last_run: Option<IngestionRun>,
    pub connector_health: Vec<ConnectorHealth>,
}
