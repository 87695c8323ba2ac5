//! Per-session event log — single producer, multiple consumers.
//!
//! The agent loop publishes an event for every observable session mutation.
//! Consumers attach and replay only future events; reconnection is the
//! consumer re-subscribing, never the producer re-sending history. The
//! stream is finite: a `Done` or `Error` event is the last one published.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::message::Role;
use crate::session::SessionStatus;

/// Events emitted by the agent loop during a session run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message was appended to the conversation.
    MessageAppended { role: Role, content: String },

    /// The session moved to a new status.
    StatusChanged { status: SessionStatus },

    /// A plan was created or replaced.
    PlanCreated { steps: Vec<String> },

    /// A tool invocation started.
    ToolCallStarted { tool_name: String, step_index: usize },

    /// A tool invocation finished.
    ToolCallFinished {
        tool_name: String,
        step_index: usize,
        success: bool,
    },

    /// The session completed — final event on the success path.
    Done { final_response: String },

    /// The session errored — final event on the failure path.
    Error { message: String },
}

impl SessionEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageAppended { .. } => "message_appended",
            Self::StatusChanged { .. } => "status_changed",
            Self::PlanCreated { .. } => "plan_created",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallFinished { .. } => "tool_call_finished",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this is the last event a session will publish.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// A broadcast-based event bus for one session.
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    /// Create a new bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SessionEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
