//! Ranking
//!
//! Exact identifier hits always precede text hits. Within each tier:
//! - exact: more identifiers matched first, then newest `recall_date`
//! - fuzzy: highest field similarity first, then newest `recall_date`
//! - substring: newest `recall_date`
//!
//! Records without a recall date sort after dated ones.

use crate::models::{MatchKind, SearchHit};
use chrono::NaiveDate;
use recall_common::db::IdentifierQuery;
use recall_common::identifiers::{normalize_barcode, text_identifier_key};
use recall_common::trigram::best_field_similarity;
use recall_common::RecallRecord;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

fn newest_first(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn barcode_matches(query_digits: &str, stored: Option<&str>) -> bool {
    stored
        .and_then(normalize_barcode)
        .is_some_and(|digits| digits.trim_start_matches('0') == query_digits.trim_start_matches('0'))
}

fn key_matches(query: Option<&str>, stored: Option<&str>) -> bool {
    match (query.and_then(text_identifier_key), stored.and_then(text_identifier_key)) {
        (Some(q), Some(s)) => q == s,
        _ => false,
    }
}

/// Number of the query's identifiers this record carries
pub fn identifiers_matched(query: &IdentifierQuery, record: &RecallRecord) -> usize {
    let barcode = query.barcode.as_deref().is_some_and(|digits| {
        barcode_matches(digits, record.upc.as_deref()) || barcode_matches(digits, record.gtin.as_deref())
    });
    let model = key_matches(query.model_number.as_deref(), record.model_number.as_deref());
    let lot = key_matches(query.lot_number.as_deref(), record.lot_number.as_deref());

    [barcode, model, lot].into_iter().filter(|&m| m).count()
}

/// Order identifier lookup results
pub fn rank_exact(query: &IdentifierQuery, records: Vec<RecallRecord>) -> Vec<SearchHit> {
    let mut scored: Vec<(usize, RecallRecord)> = records
        .into_iter()
        .map(|record| (identifiers_matched(query, &record), record))
        .collect();

    scored.sort_by(|(a_count, a), (b_count, b)| {
        b_count
            .cmp(a_count)
            .then_with(|| newest_first(a.recall_date, b.recall_date))
            .then_with(|| b.id.cmp(&a.id))
    });

    scored
        .into_iter()
        .map(|(_, record)| SearchHit {
            record,
            match_kind: MatchKind::Exact,
            score: None,
        })
        .collect()
}

/// Score trigram candidates and keep those at or above `threshold`
///
/// # Arguments
/// * `query_grams` - Trigrams of the free-text query
/// * `candidates` - Records pre-selected through the trigram index
/// * `threshold` - Minimum similarity (0.0 - 1.0)
/// * `exclude` - Record ids already returned as exact hits
pub fn rank_fuzzy(
    query_grams: &BTreeSet<String>,
    candidates: impl IntoIterator<Item = RecallRecord>,
    threshold: f64,
    exclude: &HashSet<i64>,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|record| record.id.map_or(true, |id| !exclude.contains(&id)))
        .filter_map(|record| {
            let score = best_field_similarity(query_grams, record.searchable_fields());
            (score > 0.0 && score >= threshold).then(|| SearchHit {
                record,
                match_kind: MatchKind::Fuzzy,
                score: Some(score),
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        let a_score = a.score.unwrap_or_default();
        let b_score = b.score.unwrap_or_default();
        b_score
            .total_cmp(&a_score)
            .then_with(|| newest_first(a.record.recall_date, b.record.recall_date))
            .then_with(|| b.record.id.cmp(&a.record.id))
    });
    hits
}

/// Degraded-mode hits; `records` arrive newest first from storage
pub fn substring_hits(records: Vec<RecallRecord>) -> Vec<SearchHit> {
    records
        .into_iter()
        .map(|record| SearchHit {
            record,
            match_kind: MatchKind::Substring,
            score: None,
        })
        .collect()
}
