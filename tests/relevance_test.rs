use ai_search::relevance::{ChatCompletions, RelevanceFilter};
use ai_search::types::{AiSearchError, NewsHit};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Chat backend that plays back canned replies, one per call.
struct ScriptedChat {
    replies: Mutex<VecDeque<ai_search::Result<String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedChat {
    fn new(replies: Vec<ai_search::Result<String>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let chat = Self {
            replies: Mutex::new(replies.into()),
            calls: calls.clone(),
        };
        (chat, calls)
    }
}

#[async_trait]
impl ChatCompletions for ScriptedChat {
    fn backend_name(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, _prompt: &str) -> ai_search::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted chat ran out of replies")
    }
}

fn hits(count: usize) -> Vec<NewsHit> {
    (0..count)
        .map(|i| NewsHit {
            title: format!("title-{i}"),
            snippet: format!("snippet-{i}"),
            source: "Example Daily".to_string(),
            link: format!("https://example.com/{i}"),
            date: "2 hours ago".to_string(),
        })
        .collect()
}

fn keywords() -> Vec<String> {
    vec!["pension".to_string(), "social security".to_string()]
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

#[tokio::test]
async fn ids_resolve_to_hits_in_reply_order() {
    init_tracing();

    let reply = r#"{"filtered_news": [
        {"id": 0, "score": 9, "reason": "policy update"},
        {"id": 2, "score": 8, "reason": "industry trend"}
    ]}"#;
    let (chat, calls) = ScriptedChat::new(vec![Ok(reply.to_string())]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(hits(3), &keywords(), 5).await;

    let titles: Vec<&str> = kept.iter().map(|h| h.title.as_str()).collect();
    assert_eq!(titles, vec!["title-0", "title-2"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reply_order_wins_over_batch_order() {
    init_tracing();

    let reply = r#"{"filtered_news": [
        {"id": 2, "score": 9, "reason": "r"},
        {"id": 0, "score": 7, "reason": "r"}
    ]}"#;
    let (chat, _) = ScriptedChat::new(vec![Ok(reply.to_string())]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(hits(3), &keywords(), 5).await;

    let titles: Vec<&str> = kept.iter().map(|h| h.title.as_str()).collect();
    assert_eq!(titles, vec!["title-2", "title-0"]);
}

#[tokio::test(start_paused = true)]
async fn three_malformed_replies_fail_open() {
    init_tracing();

    let garbled = || Ok("the model went off script".to_string());
    let (chat, calls) = ScriptedChat::new(vec![garbled(), garbled(), garbled()]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let input = hits(4);
    let kept = filter.filter(input.clone(), &keywords(), 5).await;

    info!("fail-open returned {} hits", kept.len());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(kept.len(), input.len());
    for (kept_hit, original) in kept.iter().zip(&input) {
        assert_eq!(kept_hit.link, original.link);
    }
}

#[tokio::test(start_paused = true)]
async fn scoring_recovers_on_a_later_attempt() {
    init_tracing();

    let valid = r#"{"filtered_news": [{"id": 1, "score": 8, "reason": "r"}]}"#;
    let (chat, calls) = ScriptedChat::new(vec![
        Ok("```json not even close".to_string()),
        Ok(valid.to_string()),
    ]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(hits(3), &keywords(), 5).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].title, "title-1");
}

#[tokio::test]
async fn fenced_replies_are_unwrapped() {
    init_tracing();

    let reply = "Here is the result:\n```json\n{\"filtered_news\": [{\"id\": 0, \"score\": 9, \"reason\": \"r\"}]}\n```\nLet me know if you need more.";
    let (chat, _) = ScriptedChat::new(vec![Ok(reply.to_string())]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(hits(2), &keywords(), 5).await;

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].title, "title-0");
}

#[tokio::test]
async fn out_of_range_ids_are_dropped() {
    init_tracing();

    let reply = r#"{"filtered_news": [
        {"id": 0, "score": 9, "reason": "r"},
        {"id": 7, "score": 9, "reason": "beyond the batch"},
        {"id": -3, "score": 9, "reason": "negative ordinal"}
    ]}"#;
    let (chat, _) = ScriptedChat::new(vec![Ok(reply.to_string())]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(hits(2), &keywords(), 5).await;

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].title, "title-0");
}

#[tokio::test(start_paused = true)]
async fn missing_envelope_key_counts_as_malformed() {
    init_tracing();

    let wrong_key = || Ok(r#"{"news": [{"id": 0, "score": 9}]}"#.to_string());
    let (chat, calls) = ScriptedChat::new(vec![wrong_key(), wrong_key(), wrong_key()]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(hits(2), &keywords(), 5).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(kept.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_failures_fail_open() {
    init_tracing();

    let provider_error = || {
        Err(AiSearchError::Provider {
            status: 502,
            body: "bad gateway".to_string(),
        })
    };
    let (chat, calls) = ScriptedChat::new(vec![
        provider_error(),
        provider_error(),
        provider_error(),
    ]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let input = hits(3);
    let kept = filter.filter(input.clone(), &keywords(), 5).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(kept.len(), input.len());
}

#[tokio::test]
async fn empty_batches_never_reach_the_model() {
    init_tracing();

    let (chat, calls) = ScriptedChat::new(vec![]);
    let filter = RelevanceFilter::new(Box::new(chat));

    let kept = filter.filter(Vec::new(), &keywords(), 5).await;

    assert!(kept.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
