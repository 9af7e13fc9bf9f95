use crate::types::{AiSearchError, NewsHit, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_SCORING_ATTEMPTS: u32 = 3;
const PARSE_RETRY_PAUSE: Duration = Duration::from_secs(1);
const CALL_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Low temperature keeps the scoring close to deterministic.
const SCORING_TEMPERATURE: f64 = 0.3;
const SCORING_MAX_TOKENS: u32 = 2000;

/// Keywords shown to the model; the full subscription list can be long.
const PROMPT_KEYWORD_LIMIT: usize = 10;

/// Trait for chat-completion backends that judge news relevance.
#[async_trait]
pub trait ChatCompletions: Send + Sync {
    /// Backend name for log lines.
    fn backend_name(&self) -> String;

    /// Send one user prompt and return the assistant's text reply.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiChatClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiChatClient {
    /// Build a client against `api_base` (e.g. `https://api.siliconflow.cn/v1`).
    ///
    /// Fails when the API key is missing. As with the search client, the
    /// proxy environment is not trusted for these requests.
    pub fn new(
        api_key: String,
        api_base: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(AiSearchError::Config("AI_API_KEY is not set".to_string()));
        }

        let client = Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(Self {
            client,
            api_key,
            api_base,
            model,
        })
    }
}

#[async_trait]
impl ChatCompletions for OpenAiChatClient {
    fn backend_name(&self) -> String {
        self.model.clone()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: SCORING_TEMPERATURE,
            max_tokens: SCORING_MAX_TOKENS,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiSearchError::Provider {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AiSearchError::Provider {
                status: status.as_u16(),
                body: "response carried no choices".to_string(),
            })?;

        Ok(content.trim().to_string())
    }
}

/// One verdict per item the model decided to keep.
#[derive(Debug, Deserialize)]
pub struct RelevanceVerdict {
    pub id: i64,
    pub score: i64,
    #[serde(default)]
    pub reason: String,
}

/// Envelope the model is instructed to reply with. Replies missing
/// `filtered_news`, or carrying non-integer ids or scores, fail the typed
/// parse and take the retry path.
#[derive(Debug, Deserialize)]
pub struct ScoreSheet {
    pub filtered_news: Vec<RelevanceVerdict>,
}

#[derive(Debug, Serialize)]
struct CandidateSummary<'a> {
    id: usize,
    title: &'a str,
    snippet: &'a str,
    source: &'a str,
}

/// Scores a batch of hits against the subscription keywords via a
/// chat-completion backend and keeps what the model keeps.
pub struct RelevanceFilter {
    chat: Box<dyn ChatCompletions>,
}

impl RelevanceFilter {
    pub fn new(chat: Box<dyn ChatCompletions>) -> Self {
        Self { chat }
    }

    /// Filter `hits` down to the ones the model scores at or above
    /// `threshold`.
    ///
    /// Never errors: when scoring cannot be completed after retries, the
    /// whole batch is returned unfiltered. Losing the enrichment entirely
    /// is worse than passing through unscored news.
    pub async fn filter(
        &self,
        hits: Vec<NewsHit>,
        keywords: &[String],
        threshold: u8,
    ) -> Vec<NewsHit> {
        if hits.is_empty() {
            return hits;
        }

        let prompt = match build_scoring_prompt(&hits, keywords, threshold) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!("could not build scoring prompt: {}", e);
                return hits;
            }
        };

        info!(
            "scoring {} hits with {}",
            hits.len(),
            self.chat.backend_name()
        );

        for attempt in 1..=MAX_SCORING_ATTEMPTS {
            match self.score_batch(&prompt, &hits).await {
                Ok(kept) => return kept,
                Err(e) => {
                    if attempt < MAX_SCORING_ATTEMPTS {
                        warn!(
                            "relevance scoring failed ({}/{}): {}",
                            attempt, MAX_SCORING_ATTEMPTS, e
                        );
                        tokio::time::sleep(retry_pause(&e)).await;
                    } else {
                        warn!("relevance scoring failed on final attempt: {}", e);
                    }
                }
            }
        }

        info!(
            "returning all {} hits unfiltered after scoring failures",
            hits.len()
        );
        hits
    }

    async fn score_batch(&self, prompt: &str, hits: &[NewsHit]) -> Result<Vec<NewsHit>> {
        let reply = self.chat.complete(prompt).await?;
        let payload = extract_json_block(&reply);
        let sheet: ScoreSheet = serde_json::from_str(payload).map_err(|e| {
            AiSearchError::Parse(format!(
                "{e}; reply started with: {}",
                payload.chars().take(200).collect::<String>()
            ))
        })?;

        // Ordinal -> hit table, built fresh per batch. Ids outside the
        // batch fall out here instead of indexing past the end.
        let by_ordinal: HashMap<i64, &NewsHit> = hits
            .iter()
            .enumerate()
            .map(|(ordinal, hit)| (ordinal as i64, hit))
            .collect();

        let mut kept = Vec::with_capacity(sheet.filtered_news.len());
        for verdict in &sheet.filtered_news {
            match by_ordinal.get(&verdict.id) {
                Some(hit) => {
                    debug!(
                        "kept id {} (score {}/10): {}",
                        verdict.id, verdict.score, verdict.reason
                    );
                    kept.push((*hit).clone());
                }
                None => debug!("dropping out-of-range id {} from model reply", verdict.id),
            }
        }

        info!("model kept {}/{} hits", kept.len(), hits.len());
        Ok(kept)
    }
}

/// Pause before the next scoring attempt. Malformed JSON is usually a
/// truncated or chatty reply and resolves quickly; transport and envelope
/// failures get a longer breather.
fn retry_pause(error: &AiSearchError) -> Duration {
    match error {
        AiSearchError::Parse(_) | AiSearchError::Serialization(_) => PARSE_RETRY_PAUSE,
        _ => CALL_RETRY_PAUSE,
    }
}

fn build_scoring_prompt(hits: &[NewsHit], keywords: &[String], threshold: u8) -> Result<String> {
    let summaries: Vec<CandidateSummary> = hits
        .iter()
        .enumerate()
        .map(|(id, hit)| CandidateSummary {
            id,
            title: &hit.title,
            snippet: &hit.snippet,
            source: &hit.source,
        })
        .collect();
    let batch = serde_json::to_string_pretty(&summaries)?;

    let keyword_context = if keywords.is_empty() {
        String::new()
    } else {
        let shown: Vec<&str> = keywords
            .iter()
            .take(PROMPT_KEYWORD_LIMIT)
            .map(String::as_str)
            .collect();
        format!("Subscribed keywords: {}", shown.join(", "))
    };

    Ok(format!(
        r#"You are a professional news analyst. Review the news list below and keep only high-quality items strongly related to the subscription topic.

**Subscription topic:**
{keyword_context}

**Content types to prioritize:**
1. Policy: announcements, adjustments, official interpretation
2. Hot news: industry headlines, major events, significant developments
3. Trending discussion: social attention, debated topics, emerging themes
4. Domain knowledge: products, case studies, coverage details for the subscribed domain
5. Industry trends: market movements, development outlook, sector analysis

**Scoring rubric (0-10):**
- 8-10: strongly related to the subscription topic (policy, hot news, domain knowledge, trends); high information value; must keep
- 5-7: moderately related with some reference value; may keep
- 0-4: weakly related or unrelated; must drop

**Ground rules:**
- Keep only news with a strong tie to the subscription topic
- If an item merely mentions a keyword but its substance is unrelated, give it a low score (0-4) and drop it
- Prefer policy, hot news, domain knowledge and trend content

**News list:**
{batch}

**Reply format:**
Score every item and reply with JSON only:
{{
  "filtered_news": [
    {{
      "id": 0,
      "score": 8,
      "reason": "why this item is strongly related"
    }}
  ]
}}

Only include items scoring >= {threshold}. Filter strictly; keep only genuinely related news."#
    ))
}

/// Strip an optional markdown code fence from a model reply, returning
/// the content between the first pair of fence markers.
fn extract_json_block(reply: &str) -> &str {
    if let Some(start) = reply.find("```json") {
        let rest = &reply[start + "```json".len()..];
        return match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
    }
    if let Some(start) = reply.find("```") {
        let rest = &reply[start + "```".len()..];
        return match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        };
    }
    reply.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_reply_passes_through() {
        assert_eq!(extract_json_block(r#" {"a": 1} "#), r#"{"a": 1}"#);
    }

    #[test]
    fn json_fence_is_stripped() {
        let reply = "Here you go:\n```json\n{\"a\": 1}\n```\ntrailing chatter";
        assert_eq!(extract_json_block(reply), r#"{"a": 1}"#);
    }

    #[test]
    fn anonymous_fence_is_stripped() {
        let reply = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(reply), r#"{"a": 1}"#);
    }

    #[test]
    fn unterminated_fence_takes_the_rest() {
        let reply = "```json\n{\"a\": 1}";
        assert_eq!(extract_json_block(reply), r#"{"a": 1}"#);
    }

    #[test]
    fn score_sheet_requires_filtered_news() {
        let err = serde_json::from_str::<ScoreSheet>(r#"{"news": []}"#);
        assert!(err.is_err());
    }

    #[test]
    fn score_sheet_rejects_non_integer_ids() {
        let err =
            serde_json::from_str::<ScoreSheet>(r#"{"filtered_news": [{"id": "0", "score": 8}]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn prompt_carries_batch_and_threshold() {
        let hits = vec![NewsHit {
            title: "Pension policy update".to_string(),
            snippet: "New rules announced".to_string(),
            source: "Example Daily".to_string(),
            link: "https://example.com/a".to_string(),
            date: "2 hours ago".to_string(),
        }];
        let keywords = vec!["pension".to_string()];
        let prompt = build_scoring_prompt(&hits, &keywords, 5).unwrap();
        assert!(prompt.contains("Pension policy update"));
        assert!(prompt.contains("Subscribed keywords: pension"));
        assert!(prompt.contains(">= 5"));
        assert!(prompt.contains("\"id\": 0"));
    }
}
