//! Paginated JSON-over-HTTP connector
//!
//! Walks a source page by page (`offset`, `page` or single request),
//! waiting on a per-connector token bucket before each request. The `since`
//! watermark is sent through a configured query parameter.

use super::{extract_records, read_secret, Connector, RawRecord, RecordStream};
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use recall_common::config::{AuthConfig, ConnectorConfig, PaginationConfig};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("recall-ingest/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Credential resolved for one fetch
#[derive(Debug, Clone)]
enum Credential {
    None,
    Header { name: String, value: String },
    Query { param: String, value: String },
    Bearer(String),
}

/// Page request parameters and the page size used to detect the last page
#[derive(Debug, Clone, PartialEq)]
struct PageRequest {
    params: Vec<(String, String)>,
    page_size: Option<u32>,
}

struct Inner {
    config: ConnectorConfig,
    client: Client,
    rate_limiter: Option<DirectRateLimiter>,
}

/// Connector for paginated JSON APIs
pub struct HttpJsonConnector {
    inner: Arc<Inner>,
}

impl HttpJsonConnector {
    /// Create a connector for one configured source
    ///
    /// # Arguments
    /// * `config` - Connector entry (endpoint, auth, pagination, mapping)
    /// * `request_timeout` - Budget for a single HTTP request
    pub fn new(config: ConnectorConfig, request_timeout: Duration) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ConnectorError::Permanent(format!("HTTP client build failed: {}", e)))?;

        let rate_limiter = config
            .rate_limit_per_sec
            .and_then(NonZeroU32::new)
            .map(|per_second| RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                rate_limiter,
            }),
        })
    }

    fn credential(&self) -> Result<Credential, ConnectorError> {
        let name = &self.inner.config.name;
        Ok(match &self.inner.config.auth {
            AuthConfig::None => Credential::None,
            AuthConfig::ApiKeyHeader { header, env } => Credential::Header {
                name: header.clone(),
                value: read_secret(name, env)?,
            },
            AuthConfig::ApiKeyQuery { param, env } => Credential::Query {
                param: param.clone(),
                value: read_secret(name, env)?,
            },
            AuthConfig::Bearer { env } => Credential::Bearer(read_secret(name, env)?),
        })
    }
}

impl Inner {
    /// Query parameters for the zero-based `page_index`, or None past `max_pages`
    fn page_request(&self, page_index: u32) -> Option<PageRequest> {
        match &self.config.pagination {
            PaginationConfig::None => (page_index == 0).then(|| PageRequest {
                params: Vec::new(),
                page_size: None,
            }),
            PaginationConfig::Offset {
                offset_param,
                limit_param,
                page_size,
                max_pages,
            } => (page_index < *max_pages).then(|| PageRequest {
                params: vec![
                    (offset_param.clone(), (page_index * page_size).to_string()),
                    (limit_param.clone(), page_size.to_string()),
                ],
                page_size: Some(*page_size),
            }),
            PaginationConfig::Page {
                page_param,
                size_param,
                page_size,
                first_page,
                max_pages,
            } => (page_index < *max_pages).then(|| {
                let mut params = vec![(page_param.clone(), (first_page + page_index).to_string())];
                if let Some(size_param) = size_param {
                    params.push((size_param.clone(), page_size.to_string()));
                }
                PageRequest {
                    params,
                    page_size: Some(*page_size),
                }
            }),
        }
    }

    fn since_param(&self, since: DateTime<Utc>) -> Option<(String, String)> {
        let since_config = self.config.since.as_ref()?;
        let param = since_config.param.as_ref()?;
        Some((param.clone(), since.format(&since_config.format).to_string()))
    }

    async fn get_page(
        &self,
        page: &PageRequest,
        since: Option<&(String, String)>,
        credential: &Credential,
    ) -> Result<Value, ConnectorError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let mut request = self
            .client
            .get(&self.config.endpoint)
            .query(&self.config.query)
            .query(&page.params);

        if let Some(since) = since {
            request = request.query(&[since]);
        }

        request = match credential {
            Credential::None => request,
            Credential::Header { name, value } => request.header(name.as_str(), value.as_str()),
            Credential::Query { param, value } => request.query(&[(param, value)]),
            Credential::Bearer(token) => request.bearer_auth(token),
        };

        debug!(
            connector = %self.config.name,
            endpoint = %self.config.endpoint,
            params = ?page.params,
            "Requesting page"
        );

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::from_status(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ConnectorError::Permanent(format!("unparseable page: {}", e)))
    }
}

#[async_trait]
impl Connector for HttpJsonConnector {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn agency(&self) -> &str {
        &self.inner.config.agency
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<RecordStream, ConnectorError> {
        let credential = self.credential()?;
        let inner = Arc::clone(&self.inner);

        let stream = async_stream::stream! {
            let since = inner.since_param(since);
            let mut page_index = 0u32;

            loop {
                let Some(page) = inner.page_request(page_index) else {
                    if page_index > 0 && inner.config.pagination != PaginationConfig::None {
                        warn!(
                            connector = %inner.config.name,
                            pages = page_index,
                            "Stopped at max_pages; remaining records will be fetched next run"
                        );
                    }
                    break;
                };

                let body = match inner.get_page(&page, since.as_ref(), &credential).await {
                    Ok(body) => body,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let records = match extract_records(body, inner.config.records_path.as_deref()) {
                    Ok(records) => records,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let count = records.len();
                for record in records {
                    yield Ok(RawRecord::new(record));
                }

                let last_page = match page.page_size {
                    None => true,
                    Some(size) => count == 0 || count < size as usize,
                };
                if last_page {
                    break;
                }
                page_index += 1;
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_common::config::RecallConfig;

    fn connector(pagination: &str) -> HttpJsonConnector {
        let toml = format!(
            r#"
            [[connectors]]
            name = "cpsc"
            agency = "CPSC"
            kind = "http_json"
            endpoint = "http://127.0.0.1:1/recalls"
            {pagination}

            [connectors.since]
            param = "RecallDateStart"

            [connectors.field_mapping]
            source_record_id = "RecallID"
            "#
        );
        let config = RecallConfig::from_toml_str(&toml).unwrap();
        HttpJsonConnector::new(config.connectors[0].clone(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_offset_pages() {
        let c = connector("pagination = { mode = \"offset\", page_size = 50, max_pages = 2 }");
        let second = c.inner.page_request(1).unwrap();
        assert_eq!(
            second.params,
            vec![
                ("offset".to_string(), "50".to_string()),
                ("limit".to_string(), "50".to_string())
            ]
        );
        assert!(c.inner.page_request(2).is_none());
    }

    #[test]
    fn test_page_numbers_start_at_first_page() {
        let c = connector(
            "pagination = { mode = \"page\", page_param = \"p\", size_param = \"per_page\", page_size = 10, first_page = 0 }",
        );
        let first = c.inner.page_request(0).unwrap();
        assert_eq!(first.params[0], ("p".to_string(), "0".to_string()));
        assert_eq!(first.params[1], ("per_page".to_string(), "10".to_string()));
    }

    #[test]
    fn test_unpaginated_source_is_single_request() {
        let c = connector("");
        assert!(c.inner.page_request(0).is_some());
        assert!(c.inner.page_request(1).is_none());
    }

    #[test]
    fn test_since_param_uses_configured_format() {
        let c = connector("");
        let since = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            c.inner.since_param(since),
            Some(("RecallDateStart".to_string(), "2024-03-05".to_string()))
        );
    }
}
