//! Inference boundary
//!
//! Single-turn calls to the underlying language model with
//! near-deterministic sampling. Responses are free text expected to
//! contain exactly one JSON object, possibly wrapped in formatting noise;
//! `extract_json_object` tolerates code fences, smart quotes, and
//! trailing commas before giving up.

use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

/// Single-turn inference call.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

//
// ================= Gemini Client =================
//

/// Reusable Gemini client (connection-pooled, temperature 0).
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(AgentError::HttpError)?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        })
    }
}

#[async_trait]
impl InferenceBackend for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AgentError::InferenceError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                top_p: 1.0,
                top_k: 1,
                max_output_tokens: 2048,
            },
        };

        info!("Calling inference boundary");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Inference request failed: {}", e);
                AgentError::InferenceError(format!("transport: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Inference error response ({}): {}", status, error_text);
            return Err(AgentError::InferenceError(format!(
                "status {}: {}",
                status, error_text
            )));
        }

        let body: GeminiResponse = response.json().await.map_err(|e| {
            AgentError::InferenceError(format!("response parse: {}", e))
        })?;

        body.candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| AgentError::InferenceError("empty response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

//
// ================= Mock Backend =================
//

/// Scripted backend for development & testing. Pops queued responses in
/// order; repeats the last one when the queue runs dry.
pub struct MockInference {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl MockInference {
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_responses(vec![response.into()])
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
        }
    }

}

#[async_trait]
impl InferenceBackend for MockInference {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        let mut queue = self.responses.lock().unwrap();
        if let Some(next) = queue.pop_front() {
            *self.last.lock().unwrap() = Some(next.clone());
            return Ok(next);
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::InferenceError("mock queue empty".to_string()))
    }
}

pub struct FailingInference;

#[async_trait]
impl InferenceBackend for FailingInference {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(AgentError::InferenceError("simulated outage".to_string()))
    }
}

//
// ================= Tolerant JSON Extraction =================
//

/// Extract the single JSON object from a model response, tolerating code
/// fences, smart quotes, and trailing commas.
pub fn extract_json_object(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();

    let start = trimmed.find('{').ok_or_else(|| {
        AgentError::SynthesisError("no JSON object in response".to_string())
    })?;
    let end = trimmed.rfind('}').ok_or_else(|| {
        AgentError::SynthesisError("unterminated JSON object in response".to_string())
    })?;
    if end < start {
        return Err(AgentError::SynthesisError(
            "malformed JSON object in response".to_string(),
        ));
    }

    let candidate = &trimmed[start..=end];

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let cleaned = strip_trailing_commas(&replace_smart_quotes(candidate));
    let value: serde_json::Value = serde_json::from_str(&cleaned).map_err(|e| {
        AgentError::SynthesisError(format!("JSON parse failed after cleanup: {}", e))
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(AgentError::SynthesisError(
            "response is not a JSON object".to_string(),
        ))
    }
}

fn replace_smart_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Remove commas that directly precede a closing bracket, outside strings.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next_meaningful = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next_meaningful, Some('}') | Some(']')) {
                    continue;
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_fenced_object() {
        let raw = "```json\n{\"intent\": \"risk\", \"confidence\": 0.9}\n```";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["intent"], "risk");
    }

    #[test]
    fn test_tolerates_trailing_commas() {
        let raw = "{\"a\": [1, 2, 3,], \"b\": {\"c\": 1,},}";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["a"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_tolerates_smart_quotes() {
        let raw = "{\u{201C}intent\u{201D}: \u{201C}spending\u{201D}}";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["intent"], "spending");
    }

    #[test]
    fn test_trailing_comma_inside_string_is_kept() {
        let raw = "{\"note\": \"a, ]\"}";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["note"], "a, ]");
    }

    #[test]
    fn test_rejects_no_object() {
        assert!(extract_json_object("no json here").is_err());
    }

    #[tokio::test]
    async fn test_mock_queue_order_and_repeat() {
        let mock = MockInference::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(mock.complete("p").await.unwrap(), "one");
        assert_eq!(mock.complete("p").await.unwrap(), "two");
        assert_eq!(mock.complete("p").await.unwrap(), "two");
    }
}
