//! Completion backend implementations for TaskForge.
//!
//! All backends implement the `taskforge_core::CompletionBackend` trait.
//! The registry owns the closed backend set and routes requests to the
//! selected one.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use registry::ProviderRegistry;
