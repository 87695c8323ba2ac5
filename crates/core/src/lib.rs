//! # TaskForge Core
//!
//! Domain types, traits, and error definitions for the TaskForge agent
//! runtime. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here (`CompletionBackend`
//! for LLM backends, the tool transport lives behind a trait in the gateway
//! crate). Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GatewayError, ProviderError, Result, SessionError};
pub use event::{SessionEvent, SessionEvents};
pub use message::{Message, Role, SessionId};
pub use provider::{Completion, CompletionBackend, CompletionRequest, ProviderKind};
pub use session::{
    Session, SessionHandle, SessionStatus, Step, StepStatus, ToolCallRecord,
};
pub use tool::{FieldKind, FieldSpec, ToolDescriptor, ToolRegistry, ToolSchema};
