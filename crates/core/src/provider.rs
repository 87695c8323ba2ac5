//! The abstraction over interchangeable LLM backends.
//!
//! A `CompletionBackend` takes a rendered conversation and returns a text
//! completion. The planner embeds tool descriptors and the active plan into
//! the context messages it builds, so backends stay wire-format-only.
//!
//! Implementations: Gemini, OpenAI-compatible, Anthropic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// The closed set of completion backends.
///
/// Unknown identifiers fail fast at the surface boundary — there is no
/// dynamic registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Gemini, Self::OpenAi, Self::Anthropic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ProviderError::Unavailable(format!(
                "Unknown provider: {other}"
            ))),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (backend-specific identifier)
    pub model: String,

    /// The rendered conversation
    pub messages: Vec<Message>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A completed response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Which model actually responded
    pub model: String,
}

/// The core completion trait.
///
/// Every backend implements this; the agent loop calls `complete()` without
/// knowing which backend is selected.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Which member of the closed provider set this backend is.
    fn kind(&self) -> ProviderKind;

    /// Whether the backend is usable (credential present). A backend that
    /// reports unavailable fails fast from `complete` — there is no silent
    /// fallback at this layer.
    fn is_available(&self) -> bool;

    /// Send a request and get a completion.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provider_kind_roundtrip() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn provider_kind_rejects_unknown() {
        let err = ProviderKind::from_str("mistral").unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn provider_kind_parse_is_case_insensitive() {
        assert_eq!(
            ProviderKind::from_str("Anthropic").unwrap(),
            ProviderKind::Anthropic
        );
    }

    #[test]
    fn request_defaults() {
        let req = CompletionRequest::new("gemini-2.5-pro", vec![]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
    }
}
