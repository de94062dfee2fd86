//! Request normalization
//!
//! Turns a caller's [`SearchRequest`] into the canonical query the engine
//! runs and the cursor fingerprints. Blank fields count as absent.

use crate::error::{QueryError, Result};
use crate::models::SearchRequest;
use recall_common::db::{IdentifierQuery, RecordFilter};
use recall_common::identifiers::normalize_barcode;

/// Canonical form of a search request (everything but paging)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedQuery {
    /// Whitespace-collapsed free text
    pub text: Option<String>,
    pub identifiers: IdentifierQuery,
    pub filter: RecordFilter,
}

impl NormalizedQuery {
    /// No text and no identifiers: list records passing the filter
    pub fn is_browse(&self) -> bool {
        self.text.is_none() && self.identifiers.is_empty()
    }

    /// Stable text form hashed into cursor fingerprints
    pub fn canonical(&self) -> String {
        let text = self.text.as_deref().map(str::to_lowercase).unwrap_or_default();
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        format!(
            "q={}|upc={}|model={}|lot={}|agencies={}|from={}|to={}",
            text,
            self.identifiers.barcode.as_deref().unwrap_or_default(),
            self.identifiers
                .model_number
                .as_deref()
                .map(str::to_uppercase)
                .unwrap_or_default(),
            self.identifiers
                .lot_number
                .as_deref()
                .map(str::to_uppercase)
                .unwrap_or_default(),
            self.filter.agencies.join(","),
            date(self.filter.date_from),
            date(self.filter.date_to),
        )
    }
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

/// Validate identifiers and normalize every query field
pub fn normalize_request(request: &SearchRequest) -> Result<NormalizedQuery> {
    let barcode = match present(request.identifiers.upc.as_deref()) {
        Some(raw) => Some(normalize_barcode(&raw).ok_or_else(|| QueryError::InvalidIdentifierFormat {
            field: "upc",
            reason: format!("'{}' is not a 6-14 digit barcode", raw),
        })?),
        None => None,
    };

    let mut agencies: Vec<String> = request
        .agencies
        .iter()
        .filter_map(|a| present(Some(a.as_str())))
        .map(|a| a.to_uppercase())
        .collect();
    agencies.sort();
    agencies.dedup();

    Ok(NormalizedQuery {
        text: present(request.query.as_deref()),
        identifiers: IdentifierQuery {
            barcode,
            model_number: present(request.identifiers.model_number.as_deref()),
            lot_number: present(request.identifiers.lot_number.as_deref()),
        },
        filter: RecordFilter {
            agencies,
            date_from: request.date_from,
            date_to: request.date_to,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentifierInput;

    #[test]
    fn test_blank_fields_are_absent() {
        let request = SearchRequest {
            query: Some("   ".to_string()),
            identifiers: IdentifierInput {
                upc: Some("".to_string()),
                model_number: Some(" \t".to_string()),
                lot_number: None,
            },
            ..Default::default()
        };
        let normalized = normalize_request(&request).unwrap();
        assert!(normalized.is_browse());
    }

    #[test]
    fn test_malformed_upc_rejected() {
        let request = SearchRequest {
            identifiers: IdentifierInput {
                upc: Some("ABC-123".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            normalize_request(&request),
            Err(QueryError::InvalidIdentifierFormat { field: "upc", .. })
        ));
    }

    #[test]
    fn test_upc_separators_stripped() {
        let request = SearchRequest {
            identifiers: IdentifierInput {
                upc: Some("0 12914-63210 9".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let normalized = normalize_request(&request).unwrap();
        assert_eq!(normalized.identifiers.barcode.as_deref(), Some("012914632109"));
    }

    #[test]
    fn test_canonical_ignores_case_order_and_spacing() {
        let a = SearchRequest {
            query: Some("Baby  Walker".to_string()),
            agencies: vec!["cpsc".to_string(), "FDA".to_string()],
            ..Default::default()
        };
        let b = SearchRequest {
            query: Some("baby walker ".to_string()),
            agencies: vec!["fda".to_string(), "CPSC".to_string(), "cpsc".to_string()],
            ..Default::default()
        };
        assert_eq!(
            normalize_request(&a).unwrap().canonical(),
            normalize_request(&b).unwrap().canonical()
        );
    }
}
