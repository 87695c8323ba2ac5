//! Wire types for the tool-provider protocol and result normalization.
//!
//! Tool providers answer in several shapes: a plain payload, an MCP-style
//! `content` block array, or a payload with an embedded error. Everything
//! collapses into `ToolOutcome { success, data | error }` so the rest of
//! the system never sees wire variance.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use taskforge_core::tool::{ToolDescriptor, ToolSchema};

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// A tool as listed by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

impl WireTool {
    pub fn into_descriptor(self) -> ToolDescriptor {
        ToolDescriptor {
            schema: ToolSchema::from_wire(&self.input_schema),
            name: self.name,
            description: self.description,
        }
    }
}

/// The uniform result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Classify a plain payload: a `success: false` marker or an `error`
    /// field (without `success: true`) means the remote reported failure.
    pub fn from_payload(payload: Value) -> Self {
        if let Some(obj) = payload.as_object() {
            let declared_success = obj.get("success").and_then(Value::as_bool);
            if declared_success == Some(false) {
                let message = obj
                    .get("error")
                    .map(render_error)
                    .unwrap_or_else(|| "Tool reported failure".into());
                return Self::err(message);
            }
            if declared_success.is_none() {
                if let Some(error) = obj.get("error") {
                    return Self::err(render_error(error));
                }
            }
        }
        Self::ok(payload)
    }
}

fn render_error(error: &Value) -> String {
    match error.as_str() {
        Some(s) => s.to_string(),
        None => error.to_string(),
    }
}

/// Normalize a raw invocation result.
///
/// MCP-style results carry a `content` array of typed blocks; the text
/// blocks are flattened and re-parsed as JSON when possible. Anything else
/// is classified directly.
pub fn normalize_result(result: Value) -> ToolOutcome {
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"].as_str() == Some("text"))
                .filter_map(|b| b["text"].as_str())
                .collect::<String>()
        });

    match content {
        Some(text) => {
            let payload = serde_json::from_str::<Value>(&text)
                .unwrap_or_else(|_| json!({ "text": text }));
            ToolOutcome::from_payload(payload)
        }
        None => ToolOutcome::from_payload(result),
    }
}
