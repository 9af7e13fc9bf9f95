//! Recency safety net over provider-supplied date strings.
//!
//! The real recency constraint is the `tbs=qdr:d` parameter on the search
//! request itself. This filter only recognizes the obvious markers and
//! keeps everything else, trusting the provider's window.

use crate::types::NewsHit;
use tracing::debug;

/// Substrings meaning "published within the last hours", in the English
/// and Chinese forms the provider emits.
const RELATIVE_MARKERS: [&str; 5] = ["ago", "hour", "minute", "小时", "分钟"];

/// Substrings meaning "published today".
const SAME_DAY_MARKERS: [&str; 2] = ["today", "今天"];

/// Pass hits through the recency heuristic.
///
/// Hits without a recognized marker are kept too; tightening this into a
/// hard filter would double-apply a constraint the request already made.
pub fn keep_recent(hits: Vec<NewsHit>) -> Vec<NewsHit> {
    for hit in &hits {
        if !has_recency_marker(&hit.date) {
            debug!(
                "no recency marker in {:?}, keeping (provider filtered upstream)",
                hit.date
            );
        }
    }
    hits
}

fn has_recency_marker(date: &str) -> bool {
    let lower = date.to_lowercase();
    RELATIVE_MARKERS.iter().any(|m| lower.contains(m))
        || SAME_DAY_MARKERS.iter().any(|m| lower.contains(m))
}
