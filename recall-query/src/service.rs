//! Query service
//!
//! Search shapes, picked from the normalized request:
//! 1. Identifiers present: exact lookup, returned ahead of any text hit
//! 2. Free text: trigram-ranked fuzzy search, or substring matching when the
//!    trigram index is missing or fuzzy search is disabled (degraded mode)
//! 3. Neither: browse the records passing the filters, newest first
//!
//! Degraded results are counted and paged in SQL. Fuzzy results are scored in
//! memory over at most `max_fuzzy_candidates` records; a response built from
//! a capped candidate set is flagged `truncated`.
//!
//! Storage failures during search are logged and answered with an empty page.

use crate::cursor::{self, Cursor};
use crate::engine;
use crate::error::{QueryError, Result};
use crate::models::{IngestionStatus, MatchKind, SearchHit, SearchRequest, SearchResponse};
use crate::validation::{normalize_request, NormalizedQuery};
use recall_common::config::SearchConfig;
use recall_common::db::{health, records, runs, RecordFilter};
use recall_common::{trigram, NaturalKey, RecallRecord};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Once;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Degraded-mode warning is logged once per process
static DEGRADED_WARNING: Once = Once::new();

/// Result set before paging
struct Matches {
    hits: Vec<SearchHit>,
    total: usize,
    degraded: bool,
    truncated: bool,
}

impl Matches {
    /// Page an in-memory result set
    fn paged(hits: Vec<SearchHit>, offset: usize, limit: usize) -> Self {
        let total = hits.len();
        Self {
            hits: hits.into_iter().skip(offset).take(limit).collect(),
            total,
            degraded: false,
            truncated: false,
        }
    }
}

fn sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read-only query surface over the recall store
#[derive(Clone)]
pub struct QueryService {
    pool: SqlitePool,
    config: SearchConfig,
}

impl QueryService {
    pub fn new(pool: SqlitePool, config: SearchConfig) -> Self {
        Self { pool, config }
    }

    /// Search recalls
    ///
    /// Fails only on malformed identifiers. A bad cursor restarts at the
    /// first page; an offset past the end yields an empty page.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let query = normalize_request(request)?;
        let fingerprint = cursor::fingerprint(&query);

        let offset = match request.cursor.as_deref() {
            None => 0,
            Some(token) => Cursor::resume(token, &fingerprint).unwrap_or_else(|e| {
                debug!(error = %e, "Ignoring cursor, restarting at first page");
                0
            }),
        };
        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));

        let started = Instant::now();
        let matches = match self.find(&query, offset, limit).await {
            Ok(matches) => matches,
            Err(e) => {
                error!(error = %e, "Search failed, returning empty page");
                Matches::paged(Vec::new(), offset, limit)
            }
        };

        let end = offset.saturating_add(matches.hits.len());
        let has_more = end < matches.total;
        let next_cursor = Cursor::new(end, fingerprint).encode();

        debug!(
            total = matches.total,
            returned = matches.hits.len(),
            offset,
            degraded = matches.degraded,
            truncated = matches.truncated,
            elapsed_ms = started.elapsed().as_millis(),
            "Search complete"
        );

        Ok(SearchResponse {
            items: matches.hits,
            total: matches.total,
            offset,
            next_cursor,
            has_more,
            degraded: matches.degraded,
            truncated: matches.truncated,
        })
    }

    /// Fetch one record by natural key
    pub async fn get_by_id(&self, source_agency: &str, source_record_id: &str) -> Result<RecallRecord> {
        let key = NaturalKey::new(source_agency.trim(), source_record_id.trim());
        records::get_by_key(&self.pool, &key)
            .await?
            .ok_or_else(|| QueryError::NotFound {
                source_agency: key.source_agency.clone(),
                source_record_id: key.source_record_id.clone(),
            })
    }

    /// Last recorded run and every connector's breaker state
    pub async fn ingestion_status(&self) -> Result<IngestionStatus> {
        let last_run = runs::latest_run(&self.pool).await?;
        let connector_health = health::all_health(&self.pool).await?;
        Ok(IngestionStatus {
            last_run,
            connector_health,
        })
    }

    /// Result set for `query`, with `hits` cut to the requested page
    async fn find(&self, query: &NormalizedQuery, offset: usize, limit: usize) -> recall_common::Result<Matches> {
        if query.is_browse() {
            let (total, page) =
                records::browse(&self.pool, &query.filter, sql_int(limit), sql_int(offset)).await?;
            return Ok(Matches {
                hits: page
                    .into_iter()
                    .map(|record| SearchHit {
                        record,
                        match_kind: MatchKind::Browse,
                        score: None,
                    })
                    .collect(),
                total: usize::try_from(total).unwrap_or_default(),
                degraded: false,
                truncated: false,
            });
        }

        let mut hits = Vec::new();
        if !query.identifiers.is_empty() {
            let found = records::find_by_identifiers(&self.pool, &query.identifiers, &query.filter).await?;
            hits = engine::rank_exact(&query.identifiers, found);
        }

        let Some(text) = &query.text else {
            return Ok(Matches::paged(hits, offset, limit));
        };
        let exact_ids: Vec<i64> = hits.iter().filter_map(|hit| hit.record.id).collect();

        let fuzzy_ready = self.config.fuzzy_enabled && records::trigram_index_available(&self.pool).await?;
        if !fuzzy_ready {
            let reason = if self.config.fuzzy_enabled {
                "trigram index missing"
            } else {
                "fuzzy search disabled"
            };
            DEGRADED_WARNING.call_once(|| {
                warn!(reason, "Fuzzy search unavailable, falling back to substring matching");
            });
            return self.substring_page(text, &query.filter, hits, &exact_ids, offset, limit).await;
        }

        let (fuzzy, truncated) = self.fuzzy_hits(text, &query.filter, &exact_ids).await?;
        hits.extend(fuzzy);
        Ok(Matches {
            truncated,
            ..Matches::paged(hits, offset, limit)
        })
    }

    /// Degraded mode: exact hits first, then substring matches paged in SQL
    async fn substring_page(
        &self,
        text: &str,
        filter: &RecordFilter,
        exact: Vec<SearchHit>,
        exact_ids: &[i64],
        offset: usize,
        limit: usize,
    ) -> recall_common::Result<Matches> {
        let exact_total = exact.len();
        let mut page: Vec<SearchHit> = exact.into_iter().skip(offset).take(limit).collect();

        let text_offset = offset.saturating_sub(exact_total);
        let text_limit = limit - page.len();
        let (text_total, found) = records::substring_matches(
            &self.pool,
            text,
            filter,
            exact_ids,
            sql_int(text_limit),
            sql_int(text_offset),
        )
        .await?;
        page.extend(engine::substring_hits(found));

        Ok(Matches {
            hits: page,
            total: exact_total + usize::try_from(text_total).unwrap_or_default(),
            degraded: true,
            truncated: false,
        })
    }

    /// Fuzzy hits and whether the candidate cap cut the candidate set short
    async fn fuzzy_hits(
        &self,
        text: &str,
        filter: &RecordFilter,
        exact_ids: &[i64],
    ) -> recall_common::Result<(Vec<SearchHit>, bool)> {
        let cap = self.config.max_fuzzy_candidates.max(1);
        let grams = trigram::trigrams(text);
        let mut ids =
            records::trigram_candidates(&self.pool, &grams, filter, sql_int(cap.saturating_add(1))).await?;
        let truncated = ids.len() > cap;
        if truncated {
            ids.truncate(cap);
            debug!(cap, "Fuzzy candidate set truncated");
        }

        let exclude: HashSet<i64> = exact_ids.iter().copied().collect();
        let candidates = records::get_by_ids(&self.pool, &ids).await?;
        let hits = engine::rank_fuzzy(&grams, candidates.into_values(), self.config.similarity_threshold, &exclude);
        Ok((hits, truncated))
    }
}
