//! Configuration loading and root folder resolution
//!
//! Configuration comes from one TOML file. The file path resolves in
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. `RECALL_CONFIG` environment variable
//! 3. `<config dir>/recall/config.toml`
//!
//! A missing file is not fatal: defaults are used and no connectors run.

use crate::models::recall_record::MAPPABLE_FIELDS;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "RECALL_CONFIG";
/// Environment variable naming the root (data) folder
pub const ROOT_ENV_VAR: &str = "RECALL_ROOT";

/// Upper bound on every `*_secs` interval and timeout (about 100 years)
pub const MAX_INTERVAL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Seconds as a chrono duration, clamped to [`MAX_INTERVAL_SECS`]
fn interval(secs: u64) -> chrono::Duration {
    // MAX_INTERVAL_SECS fits in i64 and within chrono's range
    chrono::Duration::seconds(secs.min(MAX_INTERVAL_SECS) as i64)
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecallConfig {
    /// Data folder holding the database (see [`resolve_root_folder`])
    pub root_folder: Option<PathBuf>,
    /// Explicit database file; defaults to `<root_folder>/recall.db`
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

/// Orchestrator settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Connector calls in flight at once
    pub max_concurrency: usize,
    /// Wall-clock budget for one connector fetch
    pub timeout_secs: u64,
    /// Attempts per connector per run (first try included)
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Consecutive failed runs before a connector is degraded
    pub degraded_after_failures: u32,
    /// Minimum age of the last failure before a degraded connector is probed again
    pub health_recheck_interval_secs: u64,
    /// Run cross-source matching after every N-th run (0 disables)
    pub cross_source_every_runs: u32,
    /// Maximum time to keep retrying a locked database write
    pub max_lock_wait_ms: u64,
    /// Scheduler tick for daemon mode
    pub tick_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout_secs: 120,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            degraded_after_failures: 3,
            health_recheck_interval_secs: 6 * 60 * 60,
            cross_source_every_runs: 1,
            max_lock_wait_ms: 5000,
            tick_secs: 60,
        }
    }
}

impl IngestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn health_recheck_interval(&self) -> chrono::Duration {
        interval(self.health_recheck_interval_secs)
    }
}

/// Matching engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum trigram similarity for a fuzzy hit (0.0 - 1.0)
    pub similarity_threshold: f64,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Disable to force substring matching
    pub fuzzy_enabled: bool,
    /// Upper bound on records scored per fuzzy query
    pub max_fuzzy_candidates: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.08,
            default_limit: 20,
            max_limit: 100,
            fuzzy_enabled: true,
            max_fuzzy_candidates: 2000,
        }
    }
}

/// Connector implementation selected for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Paginated JSON-over-HTTP API
    HttpJson,
    /// Locally mirrored JSON / NDJSON bulk export
    FileDump,
}

/// How a connector authenticates. Secrets are read from the named
/// environment variable, never stored in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKeyHeader { header: String, env: String },
    ApiKeyQuery { param: String, env: String },
    Bearer { env: String },
}

/// How a connector walks a paginated source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaginationConfig {
    #[default]
    None,
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        #[serde(default = "default_page_size")]
        page_size: u32,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
    Page {
        #[serde(default = "default_page_param")]
        page_param: String,
        size_param: Option<String>,
        #[serde(default = "default_page_size")]
        page_size: u32,
        #[serde(default = "default_first_page")]
        first_page: u32,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_first_page() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    500
}

/// How the `since` watermark reaches the source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SinceConfig {
    /// Query parameter carrying the watermark (HTTP sources)
    pub param: Option<String>,
    /// chrono format string for the parameter value
    #[serde(default = "default_since_format")]
    pub format: String,
    /// Record field compared against the watermark (file dumps)
    pub field: Option<String>,
}

fn default_since_format() -> String {
    "%Y-%m-%d".to_string()
}

/// Per-connector override of the orchestrator retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

/// Type coercion applied to a mapped value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercion {
    /// Trimmed text with collapsed whitespace; numbers are stringified
    #[default]
    Text,
    /// Digits only (barcodes)
    Digits,
    /// Upper-cased text
    Upper,
    /// Calendar date in any supported source format
    Date,
    /// Four-digit year
    Year,
    /// Array of scalars joined with ", "
    Join,
    /// Object of scalars (registry codes)
    Map,
}

/// One row of a field-mapping table: canonical field ← source path(s)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "FieldRuleRepr")]
pub struct FieldRule {
    /// Dotted source paths tried in order; first non-empty value wins
    pub paths: Vec<String>,
    pub coerce: Coercion,
    /// Literal used when no path yields a value
    pub default: Option<String>,
}

impl FieldRule {
    pub fn path(path: impl Into<String>, coerce: Coercion) -> Self {
        Self {
            paths: vec![path.into()],
            coerce,
            default: None,
        }
    }
}

/// Accepts both `field = "Path.To.Value"` and the full table form
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRuleRepr {
    Path(String),
    Full {
        path: Option<String>,
        #[serde(default)]
        paths: Vec<String>,
        #[serde(default)]
        coerce: Coercion,
        default: Option<String>,
    },
}

impl From<FieldRuleRepr> for FieldRule {
    fn from(repr: FieldRuleRepr) -> Self {
        match repr {
            FieldRuleRepr::Path(path) => FieldRule::path(path, Coercion::Text),
            FieldRuleRepr::Full {
                path,
                paths,
                coerce,
                default,
            } => FieldRule {
                paths: path.into_iter().chain(paths).collect(),
                coerce,
                default,
            },
        }
    }
}

/// One configured regulatory source
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Unique connector name (also the health/breaker key)
    pub name: String,
    /// Value written to `source_agency`
    pub agency: String,
    pub kind: ConnectorKind,
    /// URL (http_json) or file path (file_dump)
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    /// Dotted path to the record array inside a page; root when absent
    pub records_path: Option<String>,
    pub since: Option<SinceConfig>,
    /// Static query parameters added to every request
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub timeout_secs: Option<u64>,
    pub retry: Option<RetryOverride>,
    pub rate_limit_per_sec: Option<u32>,
    /// Region stamped on every record when the payload has none
    pub region: Option<String>,
    /// Canonical field → source rule
    pub field_mapping: BTreeMap<String, FieldRule>,
}

fn default_poll_interval() -> u64 {
    60 * 60
}

fn default_enabled() -> bool {
    true
}

impl ConnectorConfig {
    pub fn poll_interval(&self) -> chrono::Duration {
        interval(self.poll_interval_secs)
    }
}

fn check_interval(key: &str, secs: u64) -> Result<()> {
    if secs > MAX_INTERVAL_SECS {
        return Err(Error::Config(format!(
            "{} must be at most {} seconds, got {}",
            key, MAX_INTERVAL_SECS, secs
        )));
    }
    Ok(())
}

impl RecallConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RecallConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            connectors = config.connectors.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load from the resolved config path, or fall back to defaults
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => Self::load(&path),
            None => {
                warn!("No configuration file found, using defaults (no connectors configured)");
                Ok(Self::default())
            }
        }
    }

    /// Reject configurations the orchestrator cannot run
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_concurrency == 0 {
            return Err(Error::Config("ingest.max_concurrency must be at least 1".to_string()));
        }
        if self.ingest.max_attempts == 0 {
            return Err(Error::Config("ingest.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(Error::Config(format!(
                "search.similarity_threshold must be within [0, 1], got {}",
                self.search.similarity_threshold
            )));
        }
        if self.search.max_limit == 0 || self.search.default_limit == 0 {
            return Err(Error::Config("search limits must be at least 1".to_string()));
        }
        for (key, secs) in [
            ("ingest.timeout_secs", self.ingest.timeout_secs),
            ("ingest.health_recheck_interval_secs", self.ingest.health_recheck_interval_secs),
            ("ingest.tick_secs", self.ingest.tick_secs),
        ] {
            check_interval(key, secs)?;
        }

        let mut names = HashSet::new();
        for connector in &self.connectors {
            if connector.name.trim().is_empty() {
                return Err(Error::Config("connector name must not be empty".to_string()));
            }
            if !names.insert(connector.name.as_str()) {
                return Err(Error::Config(format!("duplicate connector name '{}'", connector.name)));
            }
            check_interval(
                &format!("connector '{}': poll_interval_secs", connector.name),
                connector.poll_interval_secs,
            )?;
            if let Some(secs) = connector.timeout_secs {
                check_interval(&format!("connector '{}': timeout_secs", connector.name), secs)?;
            }
            if connector.agency.trim().is_empty() {
                return Err(Error::Config(format!(
                    "connector '{}': agency must not be empty",
                    connector.name
                )));
            }
            if connector.endpoint.trim().is_empty() {
                return Err(Error::Config(format!(
                    "connector '{}': endpoint must not be empty",
                    connector.name
                )));
            }
            if !connector.field_mapping.contains_key("source_record_id") {
                return Err(Error::Config(format!(
                    "connector '{}': field_mapping must map source_record_id",
                    connector.name
                )));
            }
            for (field, rule) in &connector.field_mapping {
                if !MAPPABLE_FIELDS.contains(&field.as_str()) {
                    return Err(Error::Config(format!(
                        "connector '{}': unknown canonical field '{}'",
                        connector.name, field
                    )));
                }
                if rule.paths.is_empty() && rule.default.is_none() {
                    return Err(Error::Config(format!(
                        "connector '{}': field '{}' needs a path or a default",
                        connector.name, field
                    )));
                }
            }
            if connector.rate_limit_per_sec == Some(0) {
                return Err(Error::Config(format!(
                    "connector '{}': rate_limit_per_sec must be at least 1",
                    connector.name
                )));
            }
        }

        Ok(())
    }

    /// Database file inside the resolved root folder unless set explicitly
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root_folder.join("recall.db"))
    }

    pub fn connector(&self, name: &str) -> Option<&ConnectorConfig> {
        self.connectors.iter().find(|c| c.name == name)
    }
}

/// Resolve the configuration file path (CLI → ENV → user config dir)
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("recall").join("config.toml"))
        .filter(|p| p.exists())
}

/// Root folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. `RECALL_ROOT` environment variable
/// 3. `root_folder` from the TOML config
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &RecallConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("recall"))
        .unwrap_or_else(|| PathBuf::from("./recall_data"))
}
