//! Ingestion services

pub mod cross_source_matcher;
pub mod normalizer;
pub mod orchestrator;
pub mod retry_policy;
pub mod scheduler;
pub mod upsert_resolver;

pub use cross_source_matcher::{run_cross_source_pass, MatchSummary};
pub use normalizer::Normalizer;
pub use orchestrator::Orchestrator;
pub use retry_policy::RetryPolicy;
pub use scheduler::run_daemon;
pub use upsert_resolver::{UpsertOutcome, UpsertResolver, UpsertSummary};
