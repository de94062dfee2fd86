//! Deduplicator / upsert resolver
//!
//! Resolves each normalized record against the store by natural key:
//! absent → insert, same content hash → bump `last_seen_at`, changed →
//! update in place keeping `ingested_at` and `dedup_group_id`.

use recall_common::db::{records, retry_on_lock};
use recall_common::{RecallRecord, Result};
use serde::Serialize;
use sqlx::SqlitePool;

/// What happened to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Per-batch counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl UpsertSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Records whose row was written or re-observed
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Natural-key upsert against the record store
#[derive(Clone)]
pub struct UpsertResolver {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl UpsertResolver {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Upsert one record observed at `record.last_seen_at`
    pub async fn upsert(&self, record: &RecallRecord) -> Result<UpsertOutcome> {
        let pool = &self.pool;
        let wait = self.max_lock_wait_ms;
        let key = record.natural_key();
        let hash = record.content_hash();

        let existing = retry_on_lock("record lookup", wait, || records::find_existing(pool, &key)).await?;

        let outcome = match existing {
            None => {
                let written =
                    retry_on_lock("record insert", wait, || records::insert_record(pool, record, &hash))
                        .await?;
                if written.applied {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            Some(existing) if existing.content_hash == hash => {
                retry_on_lock("record touch", wait, || {
                    records::touch_record(pool, existing.id, record.last_seen_at)
                })
                .await?;
                UpsertOutcome::Unchanged
            }
            Some(existing) => {
                let written = retry_on_lock("record update", wait, || {
                    records::update_record(pool, existing.id, record, &hash)
                })
                .await?;
                if written.applied {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        };

        tracing::trace!(key = %key, ?outcome, "Resolved record");
        Ok(outcome)
    }

    /// Upsert a connector's batch. The first storage error aborts the batch.
    pub async fn upsert_batch(&self, batch: &[RecallRecord]) -> Result<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        for record in batch {
            summary.record(self.upsert(record).await?);
        }
        Ok(summary)
    }
}
