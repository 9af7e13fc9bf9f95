use crate::formatter::format_hits;
use crate::relevance::{ChatCompletions, OpenAiChatClient, RelevanceFilter};
use crate::search_client::{NewsSearcher, SerperClient};
use crate::time_filter::keep_recent;
use crate::types::{AggregatedItem, AiSearchConfig, AiSearchError, NewsHit, Result, RoundReport};
use chrono::Utc;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The fallback round fires only when the primary round leaves the
/// accumulator below this many distinct hits.
const FALLBACK_TRIGGER: usize = 20;

/// Hard cap on items handed back to the aggregation pipeline.
const MAX_OUTPUT_ITEMS: usize = 10;

/// Drives the search rounds, deduplication, filtering and formatting for
/// one enrichment run.
pub struct SearchOrchestrator {
    searcher: Box<dyn NewsSearcher>,
    relevance: RelevanceFilter,
    config: AiSearchConfig,
}

impl SearchOrchestrator {
    /// Wire up the production providers from `config`.
    ///
    /// Fails when an API key is missing or no keyword set is configured.
    pub fn new(config: AiSearchConfig) -> Result<Self> {
        if config.effective_primary_keywords().is_empty() && config.fallback_keywords.is_empty() {
            return Err(AiSearchError::Config(
                "no search keywords configured (PRIMARY_KEYWORDS or FALLBACK_KEYWORDS)".to_string(),
            ));
        }

        let searcher = SerperClient::new(
            config.serper_api_key.clone(),
            Duration::from_secs(config.search_timeout_secs),
        )?;
        let chat = OpenAiChatClient::new(
            config.ai_api_key.clone(),
            config.ai_api_base.clone(),
            config.ai_model.clone(),
            Duration::from_secs(config.llm_timeout_secs),
        )?;

        Ok(Self::with_providers(
            Box::new(searcher),
            Box::new(chat),
            config,
        ))
    }

    /// Assemble from explicit providers, letting callers substitute their
    /// own implementations for the network-facing pieces.
    pub fn with_providers(
        searcher: Box<dyn NewsSearcher>,
        chat: Box<dyn ChatCompletions>,
        config: AiSearchConfig,
    ) -> Self {
        Self {
            searcher,
            relevance: RelevanceFilter::new(chat),
            config,
        }
    }

    /// Run the full search-and-filter pass.
    pub async fn run(&self) -> Vec<AggregatedItem> {
        let hits = self.collect_hits().await;
        if hits.is_empty() {
            warn!("news search returned no results");
            return Vec::new();
        }
        info!("news search collected {} distinct hits", hits.len());

        let hits = keep_recent(hits);
        let keywords = self.config.effective_primary_keywords();
        let mut kept = self
            .relevance
            .filter(hits, keywords, self.config.relevance_threshold)
            .await;
        kept.truncate(MAX_OUTPUT_ITEMS);
        info!("keeping {} hits after relevance filtering", kept.len());

        let items = format_hits(&kept);
        info!("ai search finished with {} items", items.len());
        items
    }

    /// One or two search rounds merged into a link-deduplicated
    /// accumulator. Best-effort top-up: the fallback round runs once at
    /// most, and only when the primary yield is sparse.
    async fn collect_hits(&self) -> Vec<NewsHit> {
        let mut merged: Vec<NewsHit> = Vec::new();
        let mut seen_links: HashSet<String> = HashSet::new();

        let primary = self.config.effective_primary_keywords();
        if !primary.is_empty() {
            let report = self
                .run_round(primary, "primary", &mut merged, &mut seen_links)
                .await;
            info!(
                "primary round: {} fetched, {} in accumulator after dedup",
                report.fetched,
                merged.len()
            );
        }

        if merged.len() < FALLBACK_TRIGGER && !self.config.fallback_keywords.is_empty() {
            let report = self
                .run_round(
                    &self.config.fallback_keywords,
                    "fallback",
                    &mut merged,
                    &mut seen_links,
                )
                .await;
            info!(
                "fallback round: {} fetched, {} newly added",
                report.fetched, report.added
            );
        }

        merged
    }

    async fn run_round(
        &self,
        keywords: &[String],
        round: &str,
        merged: &mut Vec<NewsHit>,
        seen_links: &mut HashSet<String>,
    ) -> RoundReport {
        let query = keywords.join(" OR ");
        info!(
            "{} search round via {}: {}",
            round,
            self.searcher.provider_name(),
            query
        );
        debug!("time window: past {} hours", self.config.time_range_hours);

        let started = Instant::now();
        let fetch_time = Utc::now();
        let hits = self.searcher.search(&query, self.config.max_results).await;

        let fetched = hits.len();
        let mut added = 0;
        for hit in hits {
            if hit.link.is_empty() {
                // No key to dedupe on; every keyless hit is kept.
                merged.push(hit);
                added += 1;
            } else if seen_links.insert(hit.link.clone()) {
                merged.push(hit);
                added += 1;
            }
        }

        let report = RoundReport {
            query,
            fetched,
            added,
            fetch_time,
            response_time_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            "{} round at {} took {} ms",
            round, report.fetch_time, report.response_time_ms
        );
        report
    }
}

/// Gated entry point for the aggregation pipeline.
///
/// Returns an empty list without touching the network when the feature is
/// disabled or an API key is missing, and no failure further in escapes
/// as an error; a broken enrichment step must never abort the
/// surrounding pipeline.
pub async fn search_news(config: &AiSearchConfig) -> Vec<AggregatedItem> {
    if !config.enabled {
        return Vec::new();
    }
    if config.serper_api_key.is_empty() || config.ai_api_key.is_empty() {
        warn!("ai search enabled but API keys are missing, skipping");
        return Vec::new();
    }

    match SearchOrchestrator::new(config.clone()) {
        Ok(orchestrator) => orchestrator.run().await,
        Err(e) => {
            error!("ai search setup failed: {}", e);
            Vec::new()
        }
    }
}
