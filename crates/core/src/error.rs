//! Error types for the TaskForge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all TaskForge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool gateway errors ---
    #[error("Tool gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Completion provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Session errors ---
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors raised by the tool gateway: discovery, validation, and invocation.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Tool discovery failed: {0}")]
    Discovery(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for tool {tool_name}: {}", .problems.join(", "))]
    Validation {
        tool_name: String,
        problems: Vec<String>,
    },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout {
        tool_name: String,
        timeout_secs: u64,
    },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    Execution { tool_name: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Whether this failure class may succeed on retry.
    ///
    /// Validation and unknown-tool failures indicate a planning defect and
    /// are never retried. Transport and timeout failures are transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

/// Errors raised by a completion backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    Unavailable(String),

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed completion: {0}")]
    Malformed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors raised by the session surface and agent loop.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Iteration budget exhausted after {max_iterations} passes")]
    BudgetExhausted { max_iterations: u32 },

    #[error("Session was cancelled")]
    Cancelled,

    #[error("Session {0} is still running")]
    StillRunning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_problems() {
        let err = Error::Gateway(GatewayError::Validation {
            tool_name: "add_author".into(),
            problems: vec![
                "Missing required field: name".into(),
                "Field birth_year should be of type integer".into(),
            ],
        });
        let text = err.to_string();
        assert!(text.contains("add_author"));
        assert!(text.contains("Missing required field: name"));
        assert!(text.contains("birth_year"));
    }

    #[test]
    fn transient_classification() {
        assert!(GatewayError::Transport("conn refused".into()).is_transient());
        assert!(
            GatewayError::Timeout {
                tool_name: "list_books".into(),
                timeout_secs: 30
            }
            .is_transient()
        );
        assert!(!GatewayError::UnknownTool("nope".into()).is_transient());
        assert!(
            !GatewayError::Validation {
                tool_name: "add_book".into(),
                problems: vec![]
            }
            .is_transient()
        );
    }

    #[test]
    fn budget_error_displays_limit() {
        let err = SessionError::BudgetExhausted { max_iterations: 10 };
        assert!(err.to_string().contains("10"));
    }
}
