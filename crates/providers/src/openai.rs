//! OpenAI-compatible backend.
//!
//! Speaks the `/chat/completions` wire format, which also covers any
//! OpenAI-compatible endpoint via an `api_url` override.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use taskforge_core::error::ProviderError;
use taskforge_core::message::{Message, Role};
use taskforge_core::provider::{Completion, CompletionBackend, CompletionRequest, ProviderKind};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI chat-completions backend.
pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
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

    /// Create with a custom base URL (compatible endpoints, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_api_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                json!({"role": role, "content": m.content})
            })
            .collect()
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
                "OpenAI API key is not configured".into(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(provider = "openai", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "OpenAI API error");
            return Err(ProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_resp: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {e}")))?;

        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("No choices in response".into()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: api_resp.model,
        })
    }
}

// --- OpenAI API types ---

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}
