//! Ingestion orchestrator
//!
//! One run per cycle: `Scheduled → Running → {Success | Partial | Failed}`.
//!
//! Connectors run concurrently on a bounded worker pool
//! (`buffer_unordered(max_concurrency)`). Each connector call has a wall-clock
//! budget; transient failures are retried under the connector's
//! [`RetryPolicy`], a timeout is not retried within the run. Connector
//! failures are contained: they become the connector's sub-status and never
//! abort siblings.
//!
//! Circuit breaker: after `degraded_after_failures` consecutive failed runs a
//! connector is degraded and skipped until a health re-check succeeds.
//! Re-checks run at the start of a run once the last failure is older than
//! the re-check interval, or on demand through [`Orchestrator::recheck`].

use super::cross_source_matcher::{run_cross_source_pass, MatchSummary};
use super::normalizer::Normalizer;
use super::retry_policy::RetryPolicy;
use super::upsert_resolver::UpsertResolver;
use crate::connectors::{build_connectors, unix_epoch, Connector, RawRecord};
use crate::error::{ConnectorError, OrchestratorError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use recall_common::config::{IngestConfig, RecallConfig};
use recall_common::db::{health as health_store, retry_on_lock, runs};
use recall_common::models::{ConnectorOutcome, ConnectorRunStatus};
use recall_common::{ConnectorHealth, HealthStatus, IngestionRun, RunStatus};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A connector with everything the orchestrator needs to drive it
pub struct ConnectorSlot {
    connector: Arc<dyn Connector>,
    normalizer: Normalizer,
    policy: RetryPolicy,
    timeout: Duration,
    poll_interval: chrono::Duration,
    enabled: bool,
}

impl ConnectorSlot {
    pub fn name(&self) -> &str {
        self.connector.name()
    }
}

/// Drives ingestion runs over the configured connectors
pub struct Orchestrator {
    pool: SqlitePool,
    settings: IngestConfig,
    resolver: UpsertResolver,
    slots: Vec<ConnectorSlot>,
}

impl Orchestrator {
    /// Build connectors from configuration
    pub fn new(pool: SqlitePool, config: &RecallConfig) -> Result<Self, OrchestratorError> {
        let connectors = build_connectors(config)?;
        Self::with_connectors(pool, config, connectors)
    }

    /// Use pre-built connectors; each must have a `[[connectors]]` entry of the same name and agency
    pub fn with_connectors(
        pool: SqlitePool,
        config: &RecallConfig,
        connectors: Vec<Arc<dyn Connector>>,
    ) -> Result<Self, OrchestratorError> {
        let slots = connectors
            .into_iter()
            .map(|connector| {
                let entry = config
                    .connector(connector.name())
                    .ok_or_else(|| OrchestratorError::UnknownConnector(connector.name().to_string()))?;
                // Normalized records take `source_agency` from the entry
                if !connector.agency().eq_ignore_ascii_case(&entry.agency) {
                    return Err(OrchestratorError::Config(format!(
                        "connector '{}' reports agency '{}' but is configured as '{}'",
                        entry.name,
                        connector.agency(),
                        entry.agency
                    )));
                }

                Ok(ConnectorSlot {
                    normalizer: Normalizer::from_config(entry),
                    policy: RetryPolicy::from_config(&config.ingest, entry.retry.as_ref()),
                    timeout: entry
                        .timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| config.ingest.timeout()),
                    poll_interval: entry.poll_interval(),
                    enabled: entry.enabled,
                    connector,
                })
            })
            .collect::<Result<Vec<_>, OrchestratorError>>()?;

        Ok(Self {
            resolver: UpsertResolver::new(pool.clone(), config.ingest.max_lock_wait_ms),
            pool,
            settings: config.ingest.clone(),
            slots,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn connector_names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name()).collect()
    }

    /// Run every enabled connector now
    pub async fn run_once(&self) -> Result<IngestionRun, OrchestratorError> {
        let run = self.execute(None).await?;
        run.ok_or_else(|| OrchestratorError::Config("no run was started".to_string()))
    }

    /// Run the enabled connectors whose poll interval has elapsed at `now`.
    /// Returns None when nothing is due.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Option<IngestionRun>, OrchestratorError> {
        self.execute(Some(now)).await
    }

    /// Manual health re-check; a success restores a degraded connector
    pub async fn recheck(&self, name: &str) -> Result<ConnectorHealth, OrchestratorError> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.name() == name)
            .ok_or_else(|| OrchestratorError::UnknownConnector(name.to_string()))?;

        let health = health_store::load_health(&self.pool, name).await?;
        Ok(self.probe(slot, health).await)
    }

    /// Cross-source matching pass over the whole store
    pub async fn match_groups(&self) -> Result<MatchSummary, OrchestratorError> {
        Ok(run_cross_source_pass(&self.pool, self.settings.max_lock_wait_ms).await?)
    }

    async fn execute(&self, due_at: Option<DateTime<Utc>>) -> Result<Option<IngestionRun>, OrchestratorError> {
        let mut run = IngestionRun::scheduled();
        let run_id = run.run_id;
        let now = due_at.unwrap_or_else(Utc::now);

        let mut candidates = Vec::new();
        for slot in self.slots.iter().filter(|slot| slot.enabled) {
            match health_store::load_health(&self.pool, slot.name()).await {
                Ok(health) => candidates.push((slot, health)),
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Failed to load connector health; run cannot start");
                    run.transition_to(RunStatus::Failed);
                    self.record_run(&run).await;
                    return Err(e.into());
                }
            }
        }

        if due_at.is_some() {
            candidates.retain(|(slot, health)| self.is_due(slot, health, now));
            if candidates.is_empty() {
                return Ok(None);
            }
        }

        run.transition_to(RunStatus::Running);
        info!(run_id = %run_id, connectors = candidates.len(), "Ingestion run started");

        let mut skipped = Vec::new();
        let mut active = Vec::new();
        for (slot, mut health) in candidates {
            if health.is_degraded() && self.recheck_due(&health, now) {
                health = self.probe(slot, health).await;
            }
            if health.is_degraded() {
                info!(run_id = %run_id, connector = %slot.name(), "Connector degraded, skipping");
                skipped.push(ConnectorRunStatus::skipped(slot.name(), "connector degraded"));
            } else {
                active.push((slot, health));
            }
        }

        let mut statuses: Vec<ConnectorRunStatus> = stream::iter(active)
            .map(|(slot, health)| self.run_connector(run_id, slot, health))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        statuses.extend(skipped);
        statuses.sort_by(|a, b| a.connector_name.cmp(&b.connector_name));

        let status = run.finish(statuses);
        let failed = run
            .connectors
            .iter()
            .filter(|c| c.outcome == ConnectorOutcome::Failed)
            .count();
        info!(
            run_id = %run_id,
            status = %status,
            connectors = run.connectors.len(),
            failed,
            upserted = run.total_upserted(),
            "Ingestion run finished"
        );

        self.record_run(&run).await;
        self.scheduled_matching(run_id).await;

        Ok(Some(run))
    }

    fn is_due(&self, slot: &ConnectorSlot, health: &ConnectorHealth, now: DateTime<Utc>) -> bool {
        if health.is_degraded() {
            return self.recheck_due(health, now);
        }
        match health.last_attempt_at {
            None => true,
            Some(last) => now - last >= slot.poll_interval,
        }
    }

    fn recheck_due(&self, health: &ConnectorHealth, now: DateTime<Utc>) -> bool {
        health
            .last_failure_at
            .map_or(true, |last| now - last >= self.settings.health_recheck_interval())
    }

    /// Fetch, normalize and persist one connector; never fails the run
    async fn run_connector(
        &self,
        run_id: Uuid,
        slot: &ConnectorSlot,
        mut health: ConnectorHealth,
    ) -> ConnectorRunStatus {
        let name = slot.name();
        let fetch_started = Utc::now();
        let since = health.watermark.unwrap_or_else(unix_epoch);

        let mut status = ConnectorRunStatus {
            connector_name: name.to_string(),
            outcome: ConnectorOutcome::Failed,
            records_fetched: 0,
            records_upserted: 0,
            records_rejected: 0,
            attempts: 0,
            transient: false,
            error: None,
        };

        let (fetched, attempts) = self.fetch_with_retry(run_id, slot, since).await;
        status.attempts = attempts;

        let result = match fetched {
            Ok(raw_records) => {
                let observed_at = Utc::now();
                status.records_fetched = raw_records.len() as u64;

                let mut batch = Vec::with_capacity(raw_records.len());
                for raw in &raw_records {
                    match slot.normalizer.normalize(raw, observed_at) {
                        Ok(record) => batch.push(record),
                        Err(e) => {
                            status.records_rejected += 1;
                            debug!(connector = %name, error = %e, "Rejected record");
                        }
                    }
                }

                match self.resolver.upsert_batch(&batch).await {
                    Ok(summary) => {
                        status.records_upserted = summary.total();
                        info!(
                            run_id = %run_id,
                            connector = %name,
                            fetched = status.records_fetched,
                            inserted = summary.inserted,
                            updated = summary.updated,
                            unchanged = summary.unchanged,
                            rejected = status.records_rejected,
                            attempts,
                            "Connector completed"
                        );
                        Ok(())
                    }
                    // Storage unavailable: the batch fails, the next run retries it
                    Err(e) => Err(ConnectorError::Transient(format!("storage: {}", e))),
                }
            }
            Err(e) => Err(e),
        };

        let now = Utc::now();
        health.last_attempt_at = Some(now);

        match result {
            Ok(()) => {
                status.outcome = ConnectorOutcome::Succeeded;
                health.status = HealthStatus::Healthy;
                health.consecutive_failures = 0;
                health.last_success_at = Some(now);
                health.watermark = Some(fetch_started);
            }
            Err(e) => {
                status.transient = e.is_transient();
                status.error = Some(e.to_string());
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.last_failure_at = Some(now);
                health.last_error = Some(e.to_string());

                error!(
                    run_id = %run_id,
                    connector = %name,
                    attempts,
                    consecutive_failures = health.consecutive_failures,
                    error = %e,
                    "Connector failed"
                );

                if !health.is_degraded()
                    && health.consecutive_failures >= self.settings.degraded_after_failures
                {
                    health.status = HealthStatus::Degraded;
                    warn!(
                        connector = %name,
                        consecutive_failures = health.consecutive_failures,
                        "Connector degraded; skipped until a health re-check succeeds"
                    );
                }
            }
        }

        self.save_health(&health).await;
        status
    }

    /// Pull the connector's full output, retrying transient failures.
    /// Returns the result and the number of attempts made.
    async fn fetch_with_retry(
        &self,
        run_id: Uuid,
        slot: &ConnectorSlot,
        since: DateTime<Utc>,
    ) -> (Result<Vec<RawRecord>, ConnectorError>, u32) {
        let name = slot.name();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = Instant::now();

            let result =
                match tokio::time::timeout(slot.timeout, collect_records(slot.connector.as_ref(), since)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            run_id = %run_id,
                            connector = %name,
                            attempt,
                            timeout_ms = slot.timeout.as_millis(),
                            "Connector timed out; partial output discarded"
                        );
                        return (Err(ConnectorError::timed_out(slot.timeout)), attempt);
                    }
                };

            match result {
                Ok(records) => {
                    debug!(
                        connector = %name,
                        attempt,
                        records = records.len(),
                        elapsed_ms = started.elapsed().as_millis(),
                        "Fetch complete"
                    );
                    return (Ok(records), attempt);
                }
                Err(e) if e.is_transient() && slot.policy.allows_another_attempt(attempt) => {
                    let delay = slot.policy.delay_for(attempt);
                    warn!(
                        run_id = %run_id,
                        connector = %name,
                        attempt,
                        backoff_ms = delay.as_millis(),
                        error = %e,
                        "Transient connector failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    /// Health re-check; success restores the connector
    async fn probe(&self, slot: &ConnectorSlot, mut health: ConnectorHealth) -> ConnectorHealth {
        let result = match tokio::time::timeout(slot.timeout, slot.connector.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::timed_out(slot.timeout)),
        };

        match result {
            Ok(()) => {
                if health.is_degraded() {
                    info!(connector = %slot.name(), "Health re-check succeeded; connector restored");
                }
                health.status = HealthStatus::Healthy;
                health.consecutive_failures = 0;
            }
            Err(e) => {
                warn!(connector = %slot.name(), error = %e, "Health re-check failed");
                health.last_failure_at = Some(Utc::now());
                health.last_error = Some(e.to_string());
            }
        }

        self.save_health(&health).await;
        health
    }

    async fn save_health(&self, health: &ConnectorHealth) {
        let result = retry_on_lock("connector health save", self.settings.max_lock_wait_ms, || {
            health_store::save_health(&self.pool, health)
        })
        .await;
        if let Err(e) = result {
            error!(connector = %health.name, error = %e, "Failed to persist connector health");
        }
    }

    async fn record_run(&self, run: &IngestionRun) {
        let result = retry_on_lock("ingestion run record", self.settings.max_lock_wait_ms, || {
            runs::record_run(&self.pool, run)
        })
        .await;
        if let Err(e) = result {
            error!(run_id = %run.run_id, error = %e, "Failed to record ingestion run");
        }
    }

    /// Cross-source pass after every N-th recorded run
    async fn scheduled_matching(&self, run_id: Uuid) {
        let every = i64::from(self.settings.cross_source_every_runs);
        if every == 0 {
            return;
        }

        match runs::count_runs(&self.pool).await {
            Ok(count) if count > 0 && count % every == 0 => {
                if let Err(e) = self.match_groups().await {
                    warn!(run_id = %run_id, error = %e, "Cross-source matching pass failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(run_id = %run_id, error = %e, "Could not count runs for matching schedule"),
        }
    }
}

/// Drain a connector's stream; the first error ends the fetch
async fn collect_records(
    connector: &dyn Connector,
    since: DateTime<Utc>,
) -> Result<Vec<RawRecord>, ConnectorError> {
    let mut stream = connector.fetch(since).await?;
    let mut records = Vec::new();
    while let Some(item) = stream.next().await {
        records.push(item?);
    }
    Ok(records)
}
