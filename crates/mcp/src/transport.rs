//! Transports for the two supported tool-provider protocol variants.
//!
//! `JsonRpcTransport` speaks JSON-RPC 2.0 with an `initialize` handshake;
//! `RestTransport` speaks the plain REST variant without a handshake. The
//! gateway is written against the `McpTransport` trait so tests can inject
//! a stub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use taskforge_config::{McpConfig, McpMode};
use taskforge_core::error::GatewayError;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, ToolOutcome, WireTool, normalize_result};

/// The transport seam between the gateway and a tool provider.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Capability-negotiation handshake. A no-op for variants without one.
    async fn initialize(&self) -> Result<(), GatewayError>;

    /// Fetch the provider's tool list.
    async fn list_tools(&self) -> Result<Vec<WireTool>, GatewayError>;

    /// Invoke a tool. Remote-reported failures come back as a failed
    /// `ToolOutcome`; transport-level failures are `Err`.
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolOutcome, GatewayError>;
}

/// Build the configured transport.
pub fn transport_from_config(config: &McpConfig) -> Arc<dyn McpTransport> {
    match config.mode {
        McpMode::JsonRpc => Arc::new(JsonRpcTransport::new(config)),
        McpMode::Rest => Arc::new(RestTransport::new(config)),
    }
}

fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .expect("Failed to create HTTP client")
}

/// JSON-RPC 2.0 over HTTP POST, with the `initialize` handshake.
pub struct JsonRpcTransport {
    client: reqwest::Client,
    message_url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(config: &McpConfig) -> Self {
        Self {
            client: build_client(config.timeout_secs),
            message_url: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.message_path
            ),
            next_id: AtomicU64::new(1),
        }
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        debug!(method, id, url = %self.message_url, "Sending JSON-RPC request");

        let response = self
            .client
            .post(&self.message_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Transport(format!(
                "Tool provider returned {status}: {body}"
            )));
        }

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("Invalid JSON-RPC response: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(GatewayError::Transport(format!(
                "Tool provider error {}: {}",
                error.code, error.message
            )));
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl McpTransport for JsonRpcTransport {
    async fn initialize(&self) -> Result<(), GatewayError> {
        self.send("initialize", json!({})).await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<WireTool>, GatewayError> {
        let result = self.send("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| GatewayError::Transport("Missing tools in tools/list result".into()))?;
        serde_json::from_value(tools)
            .map_err(|e| GatewayError::Transport(format!("Malformed tool list: {e}")))
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolOutcome, GatewayError> {
        match self
            .send("tools/call", json!({"name": name, "arguments": arguments}))
            .await
        {
            Ok(result) => Ok(normalize_result(result)),
            Err(e) => Err(e),
        }
    }
}

/// Plain REST variant: GET for discovery, POST for invocation, no handshake.
pub struct RestTransport {
    client: reqwest::Client,
    tools_url: String,
    call_url: String,
}

impl RestTransport {
    pub fn new(config: &McpConfig) -> Self {
        let base = config.base_url.trim_end_matches('/');
        Self {
            client: build_client(config.timeout_secs),
            tools_url: format!("{base}{}", config.tools_path),
            call_url: format!("{base}{}", config.message_path),
        }
    }
}

#[async_trait]
impl McpTransport for RestTransport {
    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<WireTool>, GatewayError> {
        debug!(url = %self.tools_url, "Fetching tool list");

        let response = self
            .client
            .get(&self.tools_url)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Transport(format!(
                "Tool provider returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("Invalid discovery response: {e}")))?;

        // Accept both a bare array and a {"tools": [...]} wrapper
        let tools = match body {
            Value::Array(_) => body,
            Value::Object(ref obj) if obj.contains_key("tools") => obj["tools"].clone(),
            _ => {
                return Err(GatewayError::Transport(
                    "Discovery response is neither a list nor a tools object".into(),
                ));
            }
        };

        serde_json::from_value(tools)
            .map_err(|e| GatewayError::Transport(format!("Malformed tool list: {e}")))
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<ToolOutcome, GatewayError> {
        debug!(tool = name, url = %self.call_url, "Invoking tool");

        let response = self
            .client
            .post(&self.call_url)
            .json(&json!({"tool_name": name, "arguments": arguments}))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Transport(format!(
                "Tool provider returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("Invalid invocation response: {e}")))?;

        Ok(normalize_result(body))
    }
}
