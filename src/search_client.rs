use crate::types::{AiSearchError, NewsHit, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Production news-search endpoint.
pub const SERPER_API_BASE: &str = "https://google.serper.dev";

const MAX_SEARCH_ATTEMPTS: u32 = 3;
const TIMEOUT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Trait for news-search providers.
#[async_trait]
pub trait NewsSearcher: Send + Sync {
    /// Provider name for log lines.
    fn provider_name(&self) -> String;

    /// Search for news, returning up to `target_count` hits.
    ///
    /// Failures degrade to an empty list; this never errors past the
    /// provider layer.
    async fn search(&self, query: &str, target_count: usize) -> Vec<NewsHit>;
}

/// Client for the Serper news-search API.
pub struct SerperClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    /// Region: China.
    gl: &'a str,
    /// Language: simplified Chinese.
    hl: &'a str,
    /// Recency window: past day.
    tbs: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    news: Vec<NewsHit>,
}

impl SerperClient {
    /// Build a client for the production endpoint.
    ///
    /// Fails when the API key is missing. The proxy environment is not
    /// trusted for these requests; transient proxies must never sit
    /// between us and the provider.
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            return Err(AiSearchError::Config("SERPER_API_KEY is not set".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: SERPER_API_BASE.to_string(),
        })
    }

    /// Point the client at a different endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn try_search(&self, query: &str, target_count: usize) -> Result<Vec<NewsHit>> {
        let url = format!("{}/news", self.base_url);
        let body = SerperRequest {
            q: query,
            num: target_count,
            gl: "cn",
            hl: "zh-cn",
            tbs: "qdr:d",
        };

        let mut rate_limit_backoff = rate_limit_schedule();
        let mut last_error = None;

        for attempt in 1..=MAX_SEARCH_ATTEMPTS {
            let response = match self
                .client
                .post(&url)
                .header("X-API-KEY", &self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    warn!(
                        "search request timed out ({}/{})",
                        attempt, MAX_SEARCH_ATTEMPTS
                    );
                    last_error = Some(AiSearchError::Http(e));
                    if attempt < MAX_SEARCH_ATTEMPTS {
                        tokio::time::sleep(TIMEOUT_RETRY_PAUSE).await;
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status == StatusCode::OK {
                let parsed: SerperResponse = response.json().await?;
                debug!("search returned {} hits", parsed.news.len());
                return Ok(parsed.news);
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                last_error = Some(AiSearchError::RateLimited);
                if let Some(delay) = rate_limit_backoff.next_backoff() {
                    warn!(
                        "search rate limited, waiting {:?} ({}/{})",
                        delay, attempt, MAX_SEARCH_ATTEMPTS
                    );
                    tokio::time::sleep(delay).await;
                }
            } else {
                // Provider-side failure, not transient; do not retry.
                let body = response.text().await.unwrap_or_default();
                return Err(AiSearchError::Provider {
                    status: status.as_u16(),
                    body: body.chars().take(200).collect(),
                });
            }
        }

        Err(last_error.unwrap_or(AiSearchError::RateLimited))
    }
}

#[async_trait]
impl NewsSearcher for SerperClient {
    fn provider_name(&self) -> String {
        "serper".to_string()
    }

    async fn search(&self, query: &str, target_count: usize) -> Vec<NewsHit> {
        match self.try_search(query, target_count).await {
            Ok(hits) => hits,
            Err(e) => {
                error!("news search failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Backoff schedule for rate-limited search requests: 1 s, 2 s, 4 s.
fn rate_limit_schedule() -> ExponentialBackoff<backoff::SystemClock> {
    ExponentialBackoff {
        current_interval: Duration::from_secs(1),
        initial_interval: Duration::from_secs(1),
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: Duration::from_secs(8),
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_delays_double_from_one_second() {
        let mut schedule = rate_limit_schedule();
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn missing_api_key_is_a_construction_error() {
        let result = SerperClient::new(String::new(), Duration::from_secs(30));
        assert!(matches!(result, Err(AiSearchError::Config(_))));
    }
}
