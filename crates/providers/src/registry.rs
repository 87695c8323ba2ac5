//! Provider registry — owns the closed backend set and routes requests.
//!
//! Selection is explicit: `complete` fails fast with `Unavailable` when the
//! chosen backend has no credential. Fallback across backends exists only as
//! the explicit `complete_with_fallback` entry point — nothing falls back
//! silently.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use taskforge_config::AppConfig;
use taskforge_core::error::ProviderError;
use taskforge_core::message::Message;
use taskforge_core::provider::{Completion, CompletionBackend, CompletionRequest, ProviderKind};

use crate::anthropic::AnthropicBackend;
use crate::gemini::GeminiBackend;
use crate::openai::OpenAiBackend;

/// The configured set of completion backends.
pub struct ProviderRegistry {
    backends: HashMap<ProviderKind, Arc<dyn CompletionBackend>>,
    models: HashMap<ProviderKind, String>,
    default_kind: ProviderKind,
}

impl ProviderRegistry {
    /// Build every member of the closed provider set from configuration.
    /// Backends without credentials are still constructed — they report
    /// unavailable and fail fast when selected.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut backends: HashMap<ProviderKind, Arc<dyn CompletionBackend>> = HashMap::new();
        let mut models = HashMap::new();

        for kind in ProviderKind::ALL {
            let provider_config = config.provider(kind);
            let api_key = provider_config
                .and_then(|p| p.api_key.clone())
                .unwrap_or_default();
            let api_url = provider_config.and_then(|p| p.api_url.clone());
            let model = provider_config
                .and_then(|p| p.model.clone())
                .unwrap_or_else(|| default_model(kind).to_string());

            let backend: Arc<dyn CompletionBackend> = match kind {
                ProviderKind::Gemini => {
                    let mut b = GeminiBackend::new(&api_key);
                    if let Some(url) = &api_url {
                        b = b.with_base_url(url);
                    }
                    Arc::new(b)
                }
                ProviderKind::OpenAi => {
                    let mut b = OpenAiBackend::new(&api_key);
                    if let Some(url) = &api_url {
                        b = b.with_base_url(url);
                    }
                    Arc::new(b)
                }
                ProviderKind::Anthropic => {
                    let mut b = AnthropicBackend::new(&api_key);
                    if let Some(url) = &api_url {
                        b = b.with_base_url(url);
                    }
                    Arc::new(b)
                }
            };

            backends.insert(kind, backend);
            models.insert(kind, model);
        }

        let default_kind = match config.default_provider.parse() {
            Ok(kind) => kind,
            Err(_) => {
                warn!(
                    configured = %config.default_provider,
                    "Unknown default provider in config, falling back to gemini"
                );
                ProviderKind::Gemini
            }
        };

        Self {
            backends,
            models,
            default_kind,
        }
    }

    /// Replace a backend (and its model). Used by tests and by embedders
    /// that bring their own backend implementation.
    pub fn register(&mut self, backend: Arc<dyn CompletionBackend>, model: impl Into<String>) {
        let kind = backend.kind();
        self.models.insert(kind, model.into());
        self.backends.insert(kind, backend);
    }

    /// The backend for a kind. Fails fast with `Unavailable` when the
    /// credential is missing — fallback is the caller's explicit decision.
    pub fn get(
        &self,
        kind: ProviderKind,
    ) -> std::result::Result<Arc<dyn CompletionBackend>, ProviderError> {
        let backend = self
            .backends
            .get(&kind)
            .ok_or_else(|| ProviderError::Unavailable(format!("Provider {kind} is not registered")))?;

        if !backend.is_available() {
            return Err(ProviderError::Unavailable(format!(
                "Provider {kind} has no credential configured"
            )));
        }

        Ok(backend.clone())
    }

    /// The configured model for a kind.
    pub fn model_for(&self, kind: ProviderKind) -> String {
        self.models
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| default_model(kind).to_string())
    }

    /// The subset of backends with credentials, in declaration order.
    pub fn available(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| {
                self.backends
                    .get(kind)
                    .map(|b| b.is_available())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// The default kind: the configured default when it is available,
    /// otherwise the first available backend, otherwise the configured
    /// default (whose selection will fail fast downstream).
    pub fn default_kind(&self) -> ProviderKind {
        let available = self.available();
        if available.contains(&self.default_kind) {
            self.default_kind
        } else {
            available.first().copied().unwrap_or(self.default_kind)
        }
    }

    /// Complete with the selected backend. No fallback.
    pub async fn complete(
        &self,
        kind: ProviderKind,
        messages: Vec<Message>,
    ) -> std::result::Result<Completion, ProviderError> {
        let backend = self.get(kind)?;
        let request = CompletionRequest::new(self.model_for(kind), messages);
        backend.complete(request).await
    }

    /// Complete with the preferred backend, falling back across the
    /// remaining available backends in declaration order. Returns the
    /// completion together with the kind that actually answered.
    pub async fn complete_with_fallback(
        &self,
        preferred: ProviderKind,
        messages: Vec<Message>,
    ) -> std::result::Result<(Completion, ProviderKind), ProviderError> {
        let mut order: Vec<ProviderKind> = Vec::new();
        let available = self.available();
        if available.contains(&preferred) {
            order.push(preferred);
        }
        order.extend(available.into_iter().filter(|k| *k != preferred));

        if order.is_empty() {
            return Err(ProviderError::Unavailable(
                "No completion providers are configured".into(),
            ));
        }

        let mut last_error = ProviderError::Unavailable("No providers attempted".into());
        let total = order.len();

        for (attempt, kind) in order.into_iter().enumerate() {
            info!(provider = %kind, attempt = attempt + 1, total, "Trying provider");
            match self.complete(kind, messages.clone()).await {
                Ok(completion) => return Ok((completion, kind)),
                Err(e) => {
                    warn!(provider = %kind, error = %e, "Provider failed, trying next");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Default model identifier for each backend.
fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Gemini => crate::gemini::DEFAULT_MODEL,
        ProviderKind::OpenAi => crate::openai::DEFAULT_MODEL,
        ProviderKind::Anthropic => crate::anthropic::DEFAULT_MODEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use taskforge_config::ProviderConfig;

    /// A mock backend with scripted behavior.
    struct MockBackend {
        kind: ProviderKind,
        available: bool,
        response: std::result::Result<String, ProviderError>,
        calls: Mutex<usize>,
    }

    impl MockBackend {
        fn ok(kind: ProviderKind, response: &str) -> Self {
            Self {
                kind,
                available: true,
                response: Ok(response.into()),
                calls: Mutex::new(0),
            }
        }

        fn failing(kind: ProviderKind, error: ProviderError) -> Self {
            Self {
                kind,
                available: true,
                response: Err(error),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<Completion, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.response.clone().map(|content| Completion {
                content,
                model: request.model,
            })
        }
    }

    fn registry_with(backends: Vec<Arc<dyn CompletionBackend>>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::from_config(&AppConfig::default());
        for backend in backends {
            registry.register(backend, "mock-model");
        }
        registry
    }

    #[test]
    fn unconfigured_backends_are_unavailable() {
        let registry = ProviderRegistry::from_config(&AppConfig::default());
        assert!(registry.available().is_empty());
        for kind in ProviderKind::ALL {
            assert!(matches!(
                registry.get(kind),
                Err(ProviderError::Unavailable(_))
            ));
        }
    }

    #[test]
    fn configured_backend_is_available() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant-test".into()),
                api_url: None,
                model: None,
            },
        );
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.available(), vec![ProviderKind::Anthropic]);
        assert!(registry.get(ProviderKind::Anthropic).is_ok());
        // Configured default (gemini) has no key, so the first available wins
        assert_eq!(registry.default_kind(), ProviderKind::Anthropic);
    }

    #[test]
    fn model_override_from_config() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-test".into()),
                api_url: None,
                model: Some("gpt-4o-mini".into()),
            },
        );
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.model_for(ProviderKind::OpenAi), "gpt-4o-mini");
        assert_eq!(
            registry.model_for(ProviderKind::Gemini),
            crate::gemini::DEFAULT_MODEL
        );
    }

    #[tokio::test]
    async fn complete_routes_to_selected_backend() {
        let backend = Arc::new(MockBackend::ok(ProviderKind::Gemini, "planned"));
        let registry = registry_with(vec![backend.clone()]);

        let completion = registry
            .complete(ProviderKind::Gemini, vec![Message::user("plan")])
            .await
            .unwrap();
        assert_eq!(completion.content, "planned");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_tries_remaining_backends() {
        let failing = Arc::new(MockBackend::failing(
            ProviderKind::Gemini,
            ProviderError::Network("conn refused".into()),
        ));
        let succeeding = Arc::new(MockBackend::ok(ProviderKind::OpenAi, "answered"));
        let registry = registry_with(vec![failing.clone(), succeeding.clone()]);

        let (completion, used) = registry
            .complete_with_fallback(ProviderKind::Gemini, vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(completion.content, "answered");
        assert_eq!(used, ProviderKind::OpenAi);
        assert_eq!(failing.calls(), 1);
        assert_eq!(succeeding.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_with_no_backends_fails() {
        let registry = ProviderRegistry::from_config(&AppConfig::default());
        let err = registry
            .complete_with_fallback(ProviderKind::Gemini, vec![Message::user("go")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn fallback_preserves_last_error() {
        let registry = registry_with(vec![
            Arc::new(MockBackend::failing(
                ProviderKind::Gemini,
                ProviderError::Network("down".into()),
            )),
            Arc::new(MockBackend::failing(
                ProviderKind::OpenAi,
                ProviderError::AuthenticationFailed("bad key".into()),
            )),
        ]);

        let err = registry
            .complete_with_fallback(ProviderKind::Gemini, vec![Message::user("go")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }
}
