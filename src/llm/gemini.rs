//! Gemini `generateContent` backend.
//!
//! Sessions keep their history client-side and replay it on every call,
//! so switching tiers is just opening a new session seeded with the turns
//! completed so far.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::llm::backend::{
    ChatBackend, ChatFuture, ChatSession, ConversationTurn, MAX_SUGGESTED_DELAY, RemoteFailure,
    SessionRequest,
};
use crate::llm::tier::ModelTier;

/// Default base URL for the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sampling temperature used for the consultant persona.
const TEMPERATURE: f32 = 0.7;

/// HTTP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// HTTP client timeout for a whole generation.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// API key header.
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "retryDelay")]
    retry_delay: Option<String>,
}

/// Backend talking to the Gemini REST API.
#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    base_url: Arc<str>,
}

impl GeminiBackend {
    /// Create a backend against `base_url`, or the public endpoint when `None`.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: Option<&str>) -> Result<Self, RemoteFailure> {
        let base_url = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        Url::parse(base_url)
            .map_err(|e| RemoteFailure::other(format!("invalid Gemini base url {base_url}: {e}")))?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CLIENT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url),
        })
    }
}

impl ChatBackend for GeminiBackend {
    fn open_session(&self, request: SessionRequest) -> Result<Box<dyn ChatSession>, RemoteFailure> {
        if request.credential.trim().is_empty() {
            return Err(RemoteFailure::other("empty API credential"));
        }

        debug!(model = request.tier.model_id(), "Opening Gemini session");
        Ok(Box::new(GeminiSession {
            client: self.client.clone(),
            base_url: Arc::clone(&self.base_url),
            api_key: request.credential,
            tier: request.tier,
            system_instruction: request.system_prompt,
            history: request.history,
        }))
    }
}

struct GeminiSession {
    client: Client,
    base_url: Arc<str>,
    api_key: String,
    tier: ModelTier,
    system_instruction: String,
    history: Vec<ConversationTurn>,
}

impl GeminiSession {
    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.tier.model_id()
        )
    }

    async fn generate(&self, message: &str) -> Result<String, RemoteFailure> {
        let body = build_request(&self.system_instruction, &self.history, message);

        let response = self
            .client
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let retry_header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(retry_after_header);
        let text = response.text().await?;

        if !status.is_success() {
            error!(status = %status, model = self.tier.model_id(), "Gemini API error");
            let failure = classify_error(status.as_u16(), &text);
            return Err(match (failure.retry_after, retry_header) {
                (None, Some(delay)) => failure.with_retry_after(delay),
                _ => failure,
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| RemoteFailure::other(format!("failed to parse Gemini response: {e}")))?;
        extract_text(&parsed)
    }
}

impl ChatSession for GeminiSession {
    fn send_message<'a>(
        &'a mut self,
        message: &'a str,
    ) -> ChatFuture<'a, Result<String, RemoteFailure>> {
        Box::pin(async move {
            let reply = self.generate(message).await?;
            self.history
                .push(ConversationTurn::new(message, reply.clone(), self.tier));
            Ok(reply)
        })
    }

    fn tier(&self) -> ModelTier {
        self.tier
    }

    fn history(&self) -> &[ConversationTurn] {
        &self.history
    }
}

fn build_request<'a>(
    system_instruction: &'a str,
    history: &'a [ConversationTurn],
    message: &'a str,
) -> GenerateRequest<'a> {
    let mut contents = Vec::with_capacity(history.len() * 2 + 1);
    for turn in history {
        contents.push(Content {
            role: Some("user"),
            parts: vec![Part { text: &turn.input }],
        });
        contents.push(Content {
            role: Some("model"),
            parts: vec![Part { text: &turn.output }],
        });
    }
    contents.push(Content {
        role: Some("user"),
        parts: vec![Part { text: message }],
    });

    GenerateRequest {
        contents,
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: system_instruction,
            }],
        },
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            candidate_count: 1,
        },
    }
}

fn extract_text(response: &GenerateResponse) -> Result<String, RemoteFailure> {
    let parts = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.as_slice())
        .unwrap_or_default();

    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    if text.is_empty() {
        return Err(RemoteFailure::other("no content in Gemini response"));
    }
    Ok(text)
}

/// Map an error response onto a classified failure.
fn classify_error(status: u16, body: &str) -> RemoteFailure {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);

    let detail = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    let vendor_status = parsed.as_ref().and_then(|e| e.status.as_deref());
    let is_capacity = matches!(status, 429 | 503)
        || matches!(vendor_status, Some("RESOURCE_EXHAUSTED" | "UNAVAILABLE"));

    let failure = if is_capacity {
        RemoteFailure::capacity(format!("{status}: {detail}"))
    } else {
        RemoteFailure::other(format!("Gemini API error ({status}): {detail}"))
    }
    .with_status(status);

    let retry_after = parsed
        .iter()
        .flat_map(|e| e.details.iter())
        .find_map(|d| d.retry_delay.as_deref())
        .and_then(parse_duration_seconds);

    match retry_after {
        Some(delay) => failure.with_retry_after(delay),
        None => failure,
    }
}

/// Parse a protobuf-style duration such as `"6s"` or `"6.4s"`, rounding up.
fn parse_duration_seconds(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(seconds.ceil()).unwrap_or(MAX_SUGGESTED_DELAY);
    Some(delay.min(MAX_SUGGESTED_DELAY))
}

/// Whole-second `Retry-After` value, capped.
fn retry_after_header(seconds: u64) -> Duration {
    Duration::from_secs(seconds).min(MAX_SUGGESTED_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_replays_history() {
        let history = vec![ConversationTurn::new("Hi", "Hello! Your name?", ModelTier::Lite)];
        let request = build_request("persona", &history, "Ama");
        let json = serde_json::to_value(&request).unwrap_or_default();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["text"], "Hello! Your name?");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "Ama");
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "persona");
        assert!(json["system_instruction"].get("role").is_none());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"there"}]}}]}"#,
        )
        .unwrap_or(GenerateResponse { candidates: vec![] });
        assert_eq!(extract_text(&response).ok().as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_extract_text_empty_is_error() {
        let response = GenerateResponse { candidates: vec![] };
        assert!(extract_text(&response).is_err());
    }

    #[test]
    fn test_classify_quota_error() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded. Please retry in 6.4s.","status":"RESOURCE_EXHAUSTED","details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"6s"}]}}"#;
        let failure = classify_error(429, body);
        assert!(failure.is_capacity());
        assert!(failure.detail.contains("retry in 6.4s"));
        assert_eq!(failure.retry_after, Some(Duration::from_secs(6)));
        assert_eq!(failure.status, Some(429));
    }

    #[test]
    fn test_classify_overload_and_other() {
        assert!(classify_error(503, "Service Unavailable").is_capacity());
        let bad = classify_error(400, r#"{"error":{"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#);
        assert!(!bad.is_capacity());
        assert!(bad.detail.contains("API key not valid"));
    }

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration_seconds("6.2s"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration_seconds("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration_seconds("soon"), None);
        assert_eq!(parse_duration_seconds("99999999s"), Some(MAX_SUGGESTED_DELAY));
    }

    #[test]
    fn test_retry_after_header_is_capped() {
        assert_eq!(retry_after_header(30), Duration::from_secs(30));
        assert_eq!(retry_after_header(999_999_999), MAX_SUGGESTED_DELAY);
    }

    #[test]
    fn test_backend_rejects_bad_url_and_empty_key() {
        assert!(GeminiBackend::new(Some("not a url")).is_err());
        let backend = GeminiBackend::new(None);
        assert!(backend.is_ok());
        if let Ok(backend) = backend {
            let opened = backend.open_session(SessionRequest {
                credential: "  ".to_string(),
                tier: ModelTier::Lite,
                system_prompt: String::new(),
                history: vec![],
            });
            assert!(opened.is_err());
        }
    }
}
