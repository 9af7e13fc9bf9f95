use crate::types::{AggregatedItem, NewsHit};
use url::Url;

/// Source label stamped on every formatted item.
pub const AI_SEARCH_SOURCE: &str = "AI search";

/// Platform identifier the aggregation pipeline files these items under.
pub const AI_SEARCH_PLATFORM: &str = "ai_search";

const UNKNOWN_SOURCE: &str = "unknown source";

/// Convert provider hits into the aggregation pipeline's unified shape.
///
/// The mapping is per item; one odd hit never aborts the batch.
pub fn format_hits(hits: &[NewsHit]) -> Vec<AggregatedItem> {
    hits.iter().map(format_hit).collect()
}

fn format_hit(hit: &NewsHit) -> AggregatedItem {
    AggregatedItem {
        title: hit.title.clone(),
        url: hit.link.clone(),
        // The provider has no separate mobile link.
        mobile_url: hit.link.clone(),
        source: AI_SEARCH_SOURCE.to_string(),
        platform_id: AI_SEARCH_PLATFORM.to_string(),
        rank: 0,
        ranks: Vec::new(),
        source_type: AI_SEARCH_PLATFORM.to_string(),
        original_source: source_label(hit),
        date: hit.date.clone(),
        snippet: hit.snippet.clone(),
    }
}

/// The provider's source name when present, otherwise the link's host.
fn source_label(hit: &NewsHit) -> String {
    if !hit.source.is_empty() {
        return hit.source.clone();
    }

    Url::parse(&hit.link)
        .ok()
        .and_then(|url| {
            url.host_str()
                .map(|host| host.strip_prefix("www.").unwrap_or(host).to_string())
        })
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}
