//! Anthropic backend — the native Messages API.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field
//! - Response content as typed blocks

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use taskforge_core::error::ProviderError;
use taskforge_core::message::{Message, Role};
use taskforge_core::provider::{Completion, CompletionBackend, CompletionRequest, ProviderKind};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
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

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts the system prompt in a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut chat = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User => chat.push(json!({"role": "user", "content": msg.content})),
                Role::Assistant => {
                    chat.push(json!({"role": "assistant", "content": msg.content}))
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, chat)
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
                "Anthropic API key is not configured".into(),
            ));
        }

        let url = format!("{}/v1/messages", self.base_url);
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if let Some(ref system) = system {
            body["system"] = json!(system);
        }

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
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
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: AnthropicResponse = response.json().await.map_err(|e| {
            ProviderError::Malformed(format!("Failed to parse Anthropic response: {e}"))
        })?;

        let content = api_resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if content.is_empty() {
            return Err(ProviderError::Malformed(
                "Anthropic response contained no text blocks".into(),
            ));
        }

        Ok(Completion {
            content,
            model: api_resp.model,
        })
    }
}

// --- Anthropic API types ---

#[derive(Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
