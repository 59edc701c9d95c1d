use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use alcove_types::models::DigestSource;

use crate::error::DigestError;
use crate::topics;

/// Input for one generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub topics: Vec<String>,
    pub custom_prompt: Option<String>,
    pub language: String,
}

/// Output of a successful generation.
#[derive(Debug, Clone)]
pub struct GeneratedDigest {
    pub content: String,
    pub sources: Vec<DigestSource>,
}

/// The generation collaborator: opaque, possibly slow (multi-second),
/// possibly failing. The scheduler makes exactly one attempt per due user
/// per tick and imposes no retry contract.
#[async_trait]
pub trait DigestGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedDigest, DigestError>;
}

/// Gemini `generateContent` client with the Google Search grounding tool
/// enabled, so the digest cites live web sources.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), api_key, model)
    }

    pub fn with_base_url(base_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url,
            api_key,
            model,
        }
    }

    fn build_prompt(request: &GenerationRequest) -> String {
        let topic_labels = request
            .topics
            .iter()
            .map(|t| topics::label_for(t))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = format!(
            "You are a news curator writing a daily digest.\n\
             \n\
             Search for and summarize today's top stories about: {topic_labels}\n"
        );
        if let Some(custom) = request.custom_prompt.as_deref().filter(|c| !c.is_empty()) {
            prompt.push_str(&format!("\nAdditional reader instructions: {custom}\n"));
        }
        prompt.push_str(&format!(
            "\nFormat: a short greeting with today's date, then 2-3 leading \
             stories per topic (headline, two-sentence summary, why it \
             matters), then a one-paragraph closing insight.\n\
             Rules: write in {language}; focus on the last 24 hours; keep it \
             readable, around 500-800 words total.\n",
            language = request.language
        ));
        prompt
    }
}

#[async_trait]
impl DigestGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedDigest, DigestError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": Self::build_prompt(request) }] }],
            "tools": [{ "googleSearch": {} }],
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DigestError::GenerationFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DigestError::GenerationFailed(format!(
                "generation API returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| DigestError::GenerationFailed(format!("unparseable response: {e}")))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| DigestError::GenerationFailed("no candidates returned".into()))?;

        let content: String = candidate
            .content
            .and_then(|c| c.parts)
            .into_iter()
            .flatten()
            .filter_map(|part| part.text)
            .collect();
        if content.is_empty() {
            return Err(DigestError::GenerationFailed("empty digest content".into()));
        }

        let sources: Vec<DigestSource> = candidate
            .grounding_metadata
            .and_then(|m| m.grounding_chunks)
            .into_iter()
            .flatten()
            .filter_map(|chunk| chunk.web)
            .map(|web| DigestSource {
                title: web.title.unwrap_or_else(|| "Unknown Source".to_string()),
                url: web.uri.unwrap_or_default(),
            })
            .collect();

        debug!(
            "generated digest: {} chars, {} sources",
            content.len(),
            sources.len()
        );
        Ok(GeneratedDigest { content, sources })
    }
}

// -- Gemini API wire types (the subset we read) --

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    grounding_chunks: Option<Vec<GroundingChunk>>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    title: Option<String>,
    uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_topics_and_custom_instructions() {
        let request = GenerationRequest {
            topics: vec!["technology".into(), "world".into()],
            custom_prompt: Some("focus on open source".into()),
            language: "English".into(),
        };
        let prompt = GeminiClient::build_prompt(&request);
        assert!(prompt.contains("Technology, World"));
        assert!(prompt.contains("focus on open source"));
        assert!(prompt.contains("write in English"));
    }

    #[test]
    fn prompt_omits_empty_custom_instructions() {
        let request = GenerationRequest {
            topics: vec!["science".into()],
            custom_prompt: Some(String::new()),
            language: "English".into(),
        };
        let prompt = GeminiClient::build_prompt(&request);
        assert!(!prompt.contains("Additional reader instructions"));
    }

    #[test]
    fn response_parsing_extracts_text_and_sources() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Good morning! " }, { "text": "News." }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "title": "Example", "uri": "https://example.com" } },
                        { "retrievedContext": {} }
                    ]
                }
            }]
        });
        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let candidate = parsed.candidates.unwrap().remove(0);
        let text: String = candidate
            .content
            .unwrap()
            .parts
            .unwrap()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        assert_eq!(text, "Good morning! News.");
        let chunks = candidate.grounding_metadata.unwrap().grounding_chunks.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].web.is_some());
        assert!(chunks[1].web.is_none());
    }
}
