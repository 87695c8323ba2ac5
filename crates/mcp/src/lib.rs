//! Tool gateway for TaskForge.
//!
//! Discovers tools from an MCP-style tool provider, validates arguments
//! against declared schemas, dispatches invocations (remote or in-process),
//! and normalizes every response shape into a uniform outcome.

pub mod gateway;
pub mod local;
pub mod protocol;
pub mod transport;

pub use gateway::{ToolGateway, ToolInvocation};
pub use local::LocalToolset;
pub use protocol::ToolOutcome;
pub use transport::{JsonRpcTransport, McpTransport, RestTransport, transport_from_config};
