use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single result from the news-search provider.
///
/// All fields are provider strings and default to empty so a sparse
/// record never fails the whole response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source: String,
    /// Dedup key across search rounds; may be empty.
    #[serde(default)]
    pub link: String,
    /// Relative ("2 hours ago") or absolute date string, as the provider
    /// sent it.
    #[serde(default)]
    pub date: String,
}

/// The aggregation pipeline's unified item shape.
///
/// Serialized field names match the JSON the surrounding pipeline
/// exchanges for scraped hot-topic items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedItem {
    pub title: String,
    pub url: String,
    #[serde(rename = "mobileUrl")]
    pub mobile_url: String,
    pub source: String,
    pub platform_id: String,
    /// Always 0; search hits carry no chart position.
    pub rank: u32,
    pub ranks: Vec<u32>,
    pub source_type: String,
    /// The outlet that published the article.
    pub original_source: String,
    pub date: String,
    pub snippet: String,
}

/// Configuration for the AI search pipeline, owned by the caller.
///
/// Mirrors the aggregator's `AI_SEARCH` configuration block; loading it
/// from YAML or the environment is the caller's job.
#[derive(Debug, Clone)]
pub struct AiSearchConfig {
    /// Master gate; when false the entry point is a no-op.
    pub enabled: bool,
    pub serper_api_key: String,
    pub ai_api_key: String,
    /// Subscription keywords; the precise interest, searched first.
    pub primary_keywords: Vec<String>,
    /// Broader net, searched only when the primary round runs thin.
    pub fallback_keywords: Vec<String>,
    /// Keyword list from older configs; backs the primary set when
    /// `primary_keywords` is empty.
    pub search_keywords: Vec<String>,
    pub time_range_hours: u32,
    /// Result count requested per search round.
    pub max_results: usize,
    /// Minimum score (0-10) the model is told to keep.
    pub relevance_threshold: u8,
    pub ai_model: String,
    pub ai_api_base: String,
    pub search_timeout_secs: u64,
    pub llm_timeout_secs: u64,
}

impl AiSearchConfig {
    /// Primary keywords with the legacy `search_keywords` fallback applied.
    pub fn effective_primary_keywords(&self) -> &[String] {
        if self.primary_keywords.is_empty() {
            &self.search_keywords
        } else {
            &self.primary_keywords
        }
    }
}

impl Default for AiSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            serper_api_key: String::new(),
            ai_api_key: String::new(),
            primary_keywords: Vec::new(),
            fallback_keywords: Vec::new(),
            search_keywords: Vec::new(),
            time_range_hours: 24,
            max_results: 30,
            relevance_threshold: 5,
            ai_model: "deepseek-ai/DeepSeek-V3".to_string(),
            ai_api_base: "https://api.siliconflow.cn/v1".to_string(),
            search_timeout_secs: 30,
            llm_timeout_secs: 60,
        }
    }
}

/// Telemetry for one search round, logged by the orchestrator.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub query: String,
    /// Hits the provider returned for this round.
    pub fetched: usize,
    /// Hits that survived deduplication into the accumulator.
    pub added: usize,
    pub fetch_time: DateTime<Utc>,
    pub response_time_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AiSearchError {
    #[error("missing configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search provider rate limited (HTTP 429)")]
    RateLimited,

    #[error("provider error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed model response: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AiSearchError>;
