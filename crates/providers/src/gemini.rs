//! Gemini backend — Google's `generateContent` REST API.
//!
//! The API key is passed as a query parameter rather than a header, the
//! system prompt goes in a top-level `system_instruction` field, and the
//! response nests text under `candidates[].content.parts[].text`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use taskforge_core::error::ProviderError;
use taskforge_core::message::{Message, Role};
use taskforge_core::provider::{Completion, CompletionBackend, CompletionRequest, ProviderKind};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Gemini completion backend.
pub struct GeminiBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (proxies, testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Split the conversation into a system instruction and Gemini-format
    /// contents. Gemini has no system role; assistant turns map to "model".
    fn to_api_contents(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": msg.content}]
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": msg.content}]
                })),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, contents)
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        if !self.is_available() {
            return Err(ProviderError::Unavailable(
                "Gemini API key is not configured".into(),
            ));
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let (system, contents) = Self::to_api_contents(&request.messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
            }
        });

        if let Some(max_tokens) = request.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = json!(max_tokens);
        }

        if let Some(system) = system {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }

        debug!(provider = "gemini", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Gemini API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini API error");
            return Err(ProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse Gemini response: {e}")))?;

        let content = api_resp
            .candidates
            .unwrap_or_default()
            .into_iter()
            .flat_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(ProviderError::Malformed(
                "Gemini response contained no text parts".into(),
            ));
        }

        Ok(Completion {
            content,
            model: request.model,
        })
    }
}

// --- Gemini API types ---

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
