//! The tool gateway: discovery snapshots and the invocation pipeline.
//!
//! `call()` runs lookup → validation → dispatch → normalization. Validation
//! happens before any network I/O; unknown-tool and validation failures are
//! never retried. Transient transport failures get exactly one retry with
//! backoff. The gateway never touches session state — recording outcomes is
//! the agent loop's job.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use taskforge_core::error::GatewayError;
use taskforge_core::tool::ToolRegistry;

use crate::local::LocalToolset;
use crate::protocol::ToolOutcome;
use crate::transport::McpTransport;

/// Retries allowed for transient failures, per invocation.
const RETRY_BUDGET: u32 = 1;
/// Pause before retrying a transient failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// One completed invocation attempt, timestamps included.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub outcome: ToolOutcome,
    /// Fields the caller passed that the schema does not declare
    pub flagged_fields: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Mediates discovery and invocation of tools.
pub struct ToolGateway {
    transport: Arc<dyn McpTransport>,
    local: LocalToolset,
    registry: RwLock<Arc<ToolRegistry>>,
    tool_timeout: Duration,
}

impl ToolGateway {
    pub fn new(transport: Arc<dyn McpTransport>, tool_timeout: Duration) -> Self {
        Self {
            transport,
            local: LocalToolset::new(),
            registry: RwLock::new(Arc::new(ToolRegistry::empty())),
            tool_timeout,
        }
    }

    /// The most recent discovery snapshot.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.read().expect("registry lock poisoned").clone()
    }

    /// Contact the tool provider, perform the handshake where the protocol
    /// variant requires one, and replace the registry snapshot atomically.
    ///
    /// An empty tool list is a valid, non-error outcome. Local capability
    /// descriptors are merged in without overriding remote tools of the
    /// same name.
    pub async fn discover(&self) -> Result<Arc<ToolRegistry>, GatewayError> {
        self.transport
            .initialize()
            .await
            .map_err(|e| GatewayError::Discovery(e.to_string()))?;

        let wire_tools = self
            .transport
            .list_tools()
            .await
            .map_err(|e| GatewayError::Discovery(e.to_string()))?;

        let mut descriptors: Vec<_> = wire_tools
            .into_iter()
            .map(|t| t.into_descriptor())
            .collect();

        for local in self.local.descriptors() {
            if !descriptors
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(&local.name))
            {
                descriptors.push(local);
            }
        }

        let snapshot = Arc::new(ToolRegistry::from_descriptors(descriptors));
        info!(tools = snapshot.len(), "Tool discovery complete");

        *self.registry.write().expect("registry lock poisoned") = snapshot.clone();
        Ok(snapshot)
    }

    /// Invoke a tool by name.
    pub async fn call(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolInvocation, GatewayError> {
        let registry = self.registry();
        let descriptor = registry
            .get(tool_name)
            .ok_or_else(|| GatewayError::UnknownTool(tool_name.to_string()))?;
        let canonical = descriptor.name.clone();

        // Validation precedes dispatch: a schema mismatch never reaches the wire.
        let flagged = descriptor
            .schema
            .validate(&arguments)
            .map_err(|problems| GatewayError::Validation {
                tool_name: canonical.clone(),
                problems,
            })?;

        if !flagged.is_empty() {
            warn!(tool = %canonical, fields = ?flagged, "Arguments carry undeclared fields");
        }

        let started_at = Utc::now();
        let outcome = if self.local.handles(&canonical) {
            debug!(tool = %canonical, "Dispatching to local capability set");
            self.local.call(&canonical, &arguments)
        } else {
            self.call_remote(&canonical, &arguments).await?
        };

        Ok(ToolInvocation {
            tool_name: canonical,
            outcome,
            flagged_fields: flagged,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn call_remote(
        &self,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<ToolOutcome, GatewayError> {
        let (remote_name, remote_args) = map_alias(tool_name, arguments.clone());
        let mut attempt = 0u32;

        loop {
            let result = tokio::time::timeout(
                self.tool_timeout,
                self.transport.call_tool(&remote_name, &remote_args),
            )
            .await;

            match result {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(e)) if e.is_transient() && attempt < RETRY_BUDGET => {
                    attempt += 1;
                    warn!(tool = %remote_name, error = %e, attempt, "Transient failure, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Ok(Err(e)) if e.is_transient() => {
                    return Err(GatewayError::Execution {
                        tool_name: tool_name.to_string(),
                        reason: e.to_string(),
                    });
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempt < RETRY_BUDGET => {
                    attempt += 1;
                    warn!(tool = %remote_name, attempt, "Tool call timed out, retrying");
                }
                Err(_) => {
                    return Err(GatewayError::Timeout {
                        tool_name: tool_name.to_string(),
                        timeout_secs: self.tool_timeout.as_secs(),
                    });
                }
            }
        }
    }
}

/// Map alias tool names to what the provider actually serves, renaming
/// arguments where the alias and the target disagree.
fn map_alias(tool_name: &str, arguments: Value) -> (String, Value) {
    match tool_name {
        "create_book" => ("add_book".into(), arguments),
        "get_book_by_id" => {
            let mut args = arguments;
            if let Some(obj) = args.as_object_mut() {
                if let Some(id) = obj.remove("id") {
                    obj.insert("book_id".into(), id);
                }
            }
            ("get_book_details".into(), args)
        }
        other => (other.to_string(), arguments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::protocol::WireTool;

    /// A scripted transport: each `call_tool` pops the next scripted result.
    struct StubTransport {
        tools: Vec<WireTool>,
        list_calls: AtomicUsize,
        call_log: Mutex<Vec<(String, Value)>>,
        call_results: Mutex<Vec<Result<ToolOutcome, GatewayError>>>,
        fail_discovery: bool,
    }

    impl StubTransport {
        fn new(tools: Vec<WireTool>) -> Self {
            Self {
                tools,
                list_calls: AtomicUsize::new(0),
                call_log: Mutex::new(Vec::new()),
                call_results: Mutex::new(Vec::new()),
                fail_discovery: false,
            }
        }

        fn with_results(self, results: Vec<Result<ToolOutcome, GatewayError>>) -> Self {
            *self.call_results.lock().unwrap() = results;
            self
        }

        fn calls_made(&self) -> usize {
            self.call_log.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl McpTransport for StubTransport {
        async fn initialize(&self) -> Result<(), GatewayError> {
            if self.fail_discovery {
                return Err(GatewayError::Transport("handshake refused".into()));
            }
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<WireTool>, GatewayError> {
            if self.fail_discovery {
                return Err(GatewayError::Transport("conn refused".into()));
            }
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: &Value,
        ) -> Result<ToolOutcome, GatewayError> {
            self.call_log
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            let mut results = self.call_results.lock().unwrap();
            if results.is_empty() {
                Ok(ToolOutcome::ok(json!({"ok": true})))
            } else {
                results.remove(0)
            }
        }
    }

    fn book_tool() -> WireTool {
        serde_json::from_value(json!({
            "name": "add_book",
            "description": "Add a book",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "author": {"type": "string"},
                    "year": {"type": "integer"}
                },
                "required": ["title", "author"]
            }
        }))
        .unwrap()
    }

    fn gateway_with(transport: StubTransport) -> (ToolGateway, Arc<StubTransport>) {
        let transport = Arc::new(transport);
        let gateway = ToolGateway::new(transport.clone(), Duration::from_secs(5));
        (gateway, transport)
    }

    #[tokio::test]
    async fn discovery_merges_local_tools() {
        let (gateway, _) = gateway_with(StubTransport::new(vec![book_tool()]));
        let registry = gateway.discover().await.unwrap();
        assert!(registry.contains("add_book"));
        assert!(registry.contains("add_author"));
    }

    #[tokio::test]
    async fn discovery_is_idempotent() {
        let (gateway, _) = gateway_with(StubTransport::new(vec![book_tool()]));
        let first = gateway.discover().await.unwrap();
        let second = gateway.discover().await.unwrap();
        assert_eq!(first.names(), second.names());
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn discovery_failure_is_typed() {
        let mut stub = StubTransport::new(vec![]);
        stub.fail_discovery = true;
        let (gateway, _) = gateway_with(stub);
        let err = gateway.discover().await.unwrap_err();
        assert!(matches!(err, GatewayError::Discovery(_)));
    }

    #[tokio::test]
    async fn empty_registry_is_valid() {
        let (gateway, _) = gateway_with(StubTransport::new(vec![]));
        let registry = gateway.discover().await.unwrap();
        // Only the local capability set remains
        assert!(registry.contains("add_author"));
        assert!(!registry.contains("add_book"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_dispatched() {
        let (gateway, transport) = gateway_with(StubTransport::new(vec![book_tool()]));
        gateway.discover().await.unwrap();

        let err = gateway.call("no_such_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTool(_)));
        assert_eq!(transport.calls_made(), 0);
    }

    #[tokio::test]
    async fn validation_precedes_dispatch() {
        let (gateway, transport) = gateway_with(StubTransport::new(vec![book_tool()]));
        gateway.discover().await.unwrap();

        let err = gateway
            .call("add_book", json!({"title": "Dune"}))
            .await
            .unwrap_err();
        match err {
            GatewayError::Validation { problems, .. } => {
                assert!(problems[0].contains("author"));
            }
            other => panic!("Expected Validation, got {other:?}"),
        }
        assert_eq!(transport.calls_made(), 0);
    }

    #[tokio::test]
    async fn valid_call_reaches_remote() {
        let (gateway, transport) = gateway_with(StubTransport::new(vec![book_tool()]));
        gateway.discover().await.unwrap();

        let invocation = gateway
            .call("add_book", json!({"title": "Dune", "author": "Herbert"}))
            .await
            .unwrap();
        assert!(invocation.outcome.success);
        assert!(invocation.flagged_fields.is_empty());
        assert_eq!(transport.calls_made(), 1);
        assert!(invocation.finished_at >= invocation.started_at);
    }

    #[tokio::test]
    async fn unknown_fields_are_flagged_not_rejected() {
        let (gateway, _) = gateway_with(StubTransport::new(vec![book_tool()]));
        gateway.discover().await.unwrap();

        let invocation = gateway
            .call(
                "add_book",
                json!({"title": "Dune", "author": "Herbert", "publisher": "Chilton"}),
            )
            .await
            .unwrap();
        assert!(invocation.outcome.success);
        assert_eq!(invocation.flagged_fields, vec!["publisher"]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let stub = StubTransport::new(vec![book_tool()]).with_results(vec![
            Err(GatewayError::Transport("conn reset".into())),
            Ok(ToolOutcome::ok(json!({"ok": true}))),
        ]);
        let (gateway, transport) = gateway_with(stub);
        gateway.discover().await.unwrap();

        let invocation = gateway
            .call("add_book", json!({"title": "Dune", "author": "Herbert"}))
            .await
            .unwrap();
        assert!(invocation.outcome.success);
        assert_eq!(transport.calls_made(), 2);
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retry_budget() {
        let stub = StubTransport::new(vec![book_tool()]).with_results(vec![
            Err(GatewayError::Transport("conn reset".into())),
            Err(GatewayError::Transport("conn reset".into())),
        ]);
        let (gateway, transport) = gateway_with(stub);
        gateway.discover().await.unwrap();

        let err = gateway
            .call("add_book", json!({"title": "Dune", "author": "Herbert"}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Execution { .. }));
        assert_eq!(transport.calls_made(), 2);
    }

    #[tokio::test]
    async fn remote_reported_failure_is_an_outcome_not_an_error() {
        let stub = StubTransport::new(vec![book_tool()])
            .with_results(vec![Ok(ToolOutcome::err("duplicate ISBN"))]);
        let (gateway, transport) = gateway_with(stub);
        gateway.discover().await.unwrap();

        let invocation = gateway
            .call("add_book", json!({"title": "Dune", "author": "Herbert"}))
            .await
            .unwrap();
        assert!(!invocation.outcome.success);
        assert_eq!(invocation.outcome.error.as_deref(), Some("duplicate ISBN"));
        // No retry for a remote-reported failure
        assert_eq!(transport.calls_made(), 1);
    }

    #[tokio::test]
    async fn local_tools_bypass_transport() {
        let (gateway, transport) = gateway_with(StubTransport::new(vec![]));
        gateway.discover().await.unwrap();

        let invocation = gateway
            .call("add_author", json!({"name": "Jane Smith"}))
            .await
            .unwrap();
        assert!(invocation.outcome.success);
        assert_eq!(transport.calls_made(), 0);
    }

    #[tokio::test]
    async fn alias_renames_tool_and_arguments() {
        let id_tool: WireTool = serde_json::from_value(json!({
            "name": "get_book_by_id",
            "description": "Get a book by its ID",
            "inputSchema": {
                "type": "object",
                "properties": {"id": {"type": "integer"}},
                "required": ["id"]
            }
        }))
        .unwrap();
        let (gateway, transport) = gateway_with(StubTransport::new(vec![id_tool]));
        gateway.discover().await.unwrap();

        gateway.call("get_book_by_id", json!({"id": 42})).await.unwrap();

        let log = transport.call_log.lock().unwrap();
        assert_eq!(log[0].0, "get_book_details");
        assert_eq!(log[0].1, json!({"book_id": 42}));
    }

    #[test]
    fn alias_map_passthrough() {
        let (name, args) = map_alias("list_books", json!({}));
        assert_eq!(name, "list_books");
        assert_eq!(args, json!({}));

        let (name, _) = map_alias("create_book", json!({"title": "x"}));
        assert_eq!(name, "add_book");
    }
}
