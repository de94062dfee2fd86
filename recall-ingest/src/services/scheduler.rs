//! Polling daemon
//!
//! Wakes every `tick` and starts a run over the connectors whose poll
//! interval has elapsed. Runs never overlap: the next tick is only awaited
//! once the current run has been recorded.

use super::orchestrator::Orchestrator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Poll until `cancel_token` fires
///
/// # Arguments
/// * `orchestrator` - Shared orchestrator
/// * `tick` - Interval between due checks
/// * `cancel_token` - Cancelled on shutdown; an in-flight run completes first
pub async fn run_daemon(orchestrator: Arc<Orchestrator>, tick: Duration, cancel_token: CancellationToken) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(tick_secs = tick.as_secs(), "Ingestion daemon started");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Ingestion daemon stopping");
                break;
            }
            _ = interval.tick() => {
                match orchestrator.run_due(Utc::now()).await {
                    Ok(Some(run)) => debug!(run_id = %run.run_id, status = %run.status, "Scheduled run complete"),
                    Ok(None) => debug!("No connectors due"),
                    Err(e) => error!(error = %e, "Scheduled run could not start"),
                }
            }
        }
    }
}
