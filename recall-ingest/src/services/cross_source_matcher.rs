//! Cross-source matching
//!
//! Groups records from different agencies that share an exact identifier
//! (barcode, model number or VIN range) under one `dedup_group_id`.
//! Grouping is transitive (union-find). Components whose members all come
//! from one agency are left alone. Existing group ids are reused so they
//! stay stable across passes. Records are never merged or deleted.

use recall_common::db::records::{self, IdentifierRow};
use recall_common::db::retry_on_lock;
use recall_common::identifiers::{gtin14, normalize_barcode, text_identifier_key};
use recall_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use tracing::info;
use uuid::Uuid;

/// Result of one matching pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub records_considered: u64,
    pub groups: u64,
    /// Records whose group id changed in this pass
    pub records_assigned: u64,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = rb.min(ra);
        }
    }
}

/// Matching keys of one record, namespaced by identifier kind
fn match_keys(row: &IdentifierRow) -> Vec<String> {
    let mut keys = Vec::new();
    for barcode in [&row.upc, &row.gtin].into_iter().flatten() {
        if let Some(digits) = normalize_barcode(barcode) {
            keys.push(format!("barcode:{}", gtin14(&digits)));
        }
    }
    if let Some(model) = row.model_number.as_deref().and_then(text_identifier_key) {
        keys.push(format!("model:{}", model));
    }
    if let Some(vin) = row.vin_range.as_deref().and_then(text_identifier_key) {
        keys.push(format!("vin:{}", vin));
    }
    keys
}

/// Multi-agency components as lists of row indexes
fn cross_agency_components(rows: &[IdentifierRow]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(rows.len());
    let mut first_holder: HashMap<String, usize> = HashMap::new();

    for (index, row) in rows.iter().enumerate() {
        for key in match_keys(row) {
            match first_holder.get(&key) {
                Some(&holder) => sets.union(holder, index),
                None => {
                    first_holder.insert(key, index);
                }
            }
        }
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for index in 0..rows.len() {
        let root = sets.find(index);
        components.entry(root).or_default().push(index);
    }

    let mut result: Vec<Vec<usize>> = components
        .into_values()
        .filter(|members| {
            let agencies: BTreeSet<String> = members
                .iter()
                .map(|&i| rows[i].source_agency.to_uppercase())
                .collect();
            agencies.len() > 1
        })
        .collect();
    result.sort();
    result
}

/// Run one cross-source matching pass over the whole store
pub async fn run_cross_source_pass(pool: &SqlitePool, max_lock_wait_ms: u64) -> Result<MatchSummary> {
    let rows = records::identifier_rows(pool).await?;
    let components = cross_agency_components(&rows);

    let mut summary = MatchSummary {
        records_considered: rows.len() as u64,
        ..Default::default()
    };

    for members in &components {
        // Smallest existing id wins so repeated passes converge
        let group = members
            .iter()
            .filter_map(|&i| rows[i].dedup_group_id)
            .min()
            .unwrap_or_else(Uuid::new_v4);

        let ids: Vec<i64> = members.iter().map(|&i| rows[i].id).collect();
        summary.records_assigned +=
            retry_on_lock("dedup group assign", max_lock_wait_ms, || {
                records::assign_dedup_group(pool, &ids, group)
            })
            .await?;
        summary.groups += 1;
    }

    info!(
        records = summary.records_considered,
        groups = summary.groups,
        assigned = summary.records_assigned,
        "Cross-source matching pass complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, agency: &str) -> IdentifierRow {
        IdentifierRow {
            id,
            source_agency: agency.to_string(),
            upc: None,
            gtin: None,
            model_number: None,
            vin_range: None,
            dedup_group_id: None,
        }
    }

    #[test]
    fn test_barcode_padding_matches_across_agencies() {
        let mut a = row(1, "CPSC");
        a.upc = Some("012914632109".to_string());
        let mut b = row(2, "HEALTH_CANADA");
        b.gtin = Some("0012914632109".to_string());
        let c = row(3, "FDA");

        assert_eq!(cross_agency_components(&[a, b, c]), vec![vec![0, 1]]);
    }

    #[test]
    fn test_single_agency_component_ignored() {
        let mut a = row(1, "CPSC");
        a.model_number = Some("SW-200".to_string());
        let mut b = row(2, "CPSC");
        b.model_number = Some("sw-200 ".to_string());

        assert!(cross_agency_components(&[a, b]).is_empty());
    }

    #[test]
    fn test_grouping_is_transitive() {
        let mut a = row(1, "CPSC");
        a.upc = Some("012914632109".to_string());
        let mut b = row(2, "HEALTH_CANADA");
        b.upc = Some("012914632109".to_string());
        b.model_number = Some("SW-200".to_string());
        let mut c = row(3, "EU_SAFETY_GATE");
        c.model_number = Some("sw-200".to_string());

        assert_eq!(cross_agency_components(&[a, b, c]), vec![vec![0, 1, 2]]);
    }
}
