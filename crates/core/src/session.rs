//! Session state: the canonical record of one agent run.
//!
//! A `Session` is created when a goal is submitted, mutated exclusively by
//! the agent loop while the run is in progress, and becomes immutable once
//! it reaches a terminal status. `SessionHandle` is the shared wrapper the
//! loop and the session surface agree on: state behind a lock, a per-session
//! event bus, and a cancellation token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{SessionEvent, SessionEvents};
use crate::message::{Message, SessionId};
use crate::provider::ProviderKind;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Planning,
    Acting,
    Evaluating,
    Completed,
    Error,
}

impl SessionStatus {
    /// Terminal statuses are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::Acting => "acting",
            Self::Evaluating => "evaluating",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Execution status of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One planned unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Position in the plan, zero-based
    pub index: usize,

    /// Human-readable intent
    pub description: String,

    /// Which tool this step expects to invoke, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Arguments proposed by the planner for the tool invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,

    pub status: StepStatus,
}

impl Step {
    pub fn new(index: usize, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            tool_name: None,
            arguments: None,
            status: StepStatus::Pending,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, arguments: Value) -> Self {
        self.tool_name = Some(tool_name.into());
        self.arguments = Some(arguments);
        self
    }

    /// Pending → InProgress. Returns false for any other starting state.
    pub fn begin(&mut self) -> bool {
        if self.status == StepStatus::Pending {
            self.status = StepStatus::InProgress;
            true
        } else {
            false
        }
    }

    /// InProgress → Done/Failed. Returns false for any other starting state.
    pub fn finish(&mut self, success: bool) -> bool {
        if self.status == StepStatus::InProgress {
            self.status = if success {
                StepStatus::Done
            } else {
                StepStatus::Failed
            };
            true
        } else {
            false
        }
    }

    /// Pending → Skipped. Returns false for any other starting state.
    pub fn skip(&mut self) -> bool {
        if self.status == StepStatus::Pending {
            self.status = StepStatus::Skipped;
            true
        } else {
            false
        }
    }
}

/// Immutable audit entry for one tool invocation attempt.
///
/// Created exactly once per attempt; a retried call creates a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub step_index: usize,
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn succeeded(
        step_index: usize,
        tool_name: impl Into<String>,
        arguments: Value,
        output: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_index,
            tool_name: tool_name.into(),
            arguments,
            output: Some(output),
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        step_index: usize,
        tool_name: impl Into<String>,
        arguments: Value,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_index,
            tool_name: tool_name.into(),
            arguments,
            output: None,
            error: Some(error.into()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One user-visible conversation/task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub goal: String,
    pub provider: ProviderKind,
    pub messages: Vec<Message>,
    pub plan: Vec<Step>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iteration_count: u32,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: impl Into<String>, provider: ProviderKind) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            goal: goal.into(),
            provider,
            messages: Vec::new(),
            plan: Vec::new(),
            tool_calls: Vec::new(),
            iteration_count: 0,
            status: SessionStatus::Initializing,
            error: None,
            final_response: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a message. Messages are append-only during a run.
    pub fn push_message(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Replace the plan wholesale (initial planning or replan).
    pub fn replace_plan(&mut self, plan: Vec<Step>) {
        self.updated_at = Utc::now();
        self.plan = plan;
    }

    /// Append an audit record.
    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.updated_at = Utc::now();
        self.tool_calls.push(record);
    }

    /// Index of the next pending step, in plan order.
    pub fn next_pending_step(&self) -> Option<usize> {
        self.plan
            .iter()
            .find(|s| s.status == StepStatus::Pending)
            .map(|s| s.index)
    }

    /// Whether every step has reached a terminal status.
    pub fn plan_settled(&self) -> bool {
        self.plan.iter().all(|s| s.status.is_terminal())
    }

    /// Whether any step failed.
    pub fn any_step_failed(&self) -> bool {
        self.plan.iter().any(|s| s.status == StepStatus::Failed)
    }

    /// Move to a non-terminal status. Terminal statuses are absorbing:
    /// once Completed or Error, no further transition happens and this
    /// returns false.
    pub fn set_status(&mut self, status: SessionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.updated_at = Utc::now();
        self.status = status;
        true
    }

    /// Terminal transition to Completed. Returns false if already terminal.
    pub fn complete(&mut self, final_response: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.updated_at = Utc::now();
        self.final_response = Some(final_response.into());
        self.status = SessionStatus::Completed;
        true
    }

    /// Terminal transition to Error. A best-effort final response may
    /// already be present. Returns false if already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.updated_at = Utc::now();
        self.error = Some(error.into());
        self.status = SessionStatus::Error;
        true
    }

    /// Reset message/plan/tool-call history, preserving identity.
    pub fn reset_history(&mut self) {
        self.updated_at = Utc::now();
        self.messages.clear();
        self.plan.clear();
        self.tool_calls.clear();
        self.iteration_count = 0;
        self.status = SessionStatus::Initializing;
        self.error = None;
        self.final_response = None;
    }
}

/// Shared per-session handle: state, event bus, cancellation.
///
/// The agent loop is the only component that calls `with_state_mut`; the
/// surface reads snapshots and subscribes to events.
pub struct SessionHandle {
    id: SessionId,
    state: RwLock<Session>,
    events: SessionEvents,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            state: RwLock::new(session),
            events: SessionEvents::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Clone of the current state.
    pub async fn snapshot(&self) -> Session {
        self.state.read().await.clone()
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&*self.state.read().await)
    }

    pub async fn with_state_mut<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut *self.state.write().await)
    }

    pub fn emit(&self, event: SessionEvent) {
        self.events.publish(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_transitions_are_guarded() {
        let mut step = Step::new(0, "Add the author");
        assert!(step.begin());
        assert!(!step.begin());
        assert!(step.finish(true));
        assert_eq!(step.status, StepStatus::Done);
        assert!(!step.finish(false));
    }

    #[test]
    fn step_cannot_finish_before_begin() {
        let mut step = Step::new(0, "Add the author");
        assert!(!step.finish(true));
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn step_skip_only_from_pending() {
        let mut step = Step::new(0, "Look up the book");
        assert!(step.skip());
        assert!(!step.skip());
        assert_eq!(step.status, StepStatus::Skipped);
    }

    #[test]
    fn next_pending_follows_plan_order() {
        let mut session = Session::new("list my books", ProviderKind::Gemini);
        let mut first = Step::new(0, "first");
        first.begin();
        first.finish(true);
        session.replace_plan(vec![first, Step::new(1, "second"), Step::new(2, "third")]);
        assert_eq!(session.next_pending_step(), Some(1));
    }

    #[test]
    fn terminal_status_is_absorbing() {
        let mut session = Session::new("goal", ProviderKind::Gemini);
        assert!(session.complete("done"));
        assert!(!session.fail("too late"));
        assert!(!session.set_status(SessionStatus::Planning));
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.error.is_none());
    }

    #[test]
    fn fail_records_error() {
        let mut session = Session::new("goal", ProviderKind::OpenAi);
        assert!(session.fail("tool timed out"));
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error.as_deref(), Some("tool timed out"));
        assert!(!session.complete("nope"));
    }

    #[test]
    fn reset_preserves_identity() {
        let mut session = Session::new("goal", ProviderKind::Anthropic);
        let id = session.id.clone();
        session.push_message(Message::user("hello"));
        session.record_tool_call(ToolCallRecord::succeeded(
            0,
            "list_books",
            json!({}),
            json!({"books": []}),
            Utc::now(),
        ));
        session.complete("done");

        session.reset_history();
        assert_eq!(session.id, id);
        assert!(session.messages.is_empty());
        assert!(session.tool_calls.is_empty());
        assert_eq!(session.iteration_count, 0);
        assert_eq!(session.status, SessionStatus::Initializing);
        assert!(session.final_response.is_none());
    }

    #[test]
    fn record_retains_append_order() {
        let mut session = Session::new("goal", ProviderKind::Gemini);
        let start = Utc::now();
        session.record_tool_call(ToolCallRecord::succeeded(
            0,
            "list_books",
            json!({}),
            json!([]),
            start,
        ));
        session.record_tool_call(ToolCallRecord::failed(
            1,
            "add_book",
            json!({"title": "x"}),
            "missing author",
            start,
        ));
        assert_eq!(session.tool_calls.len(), 2);
        assert_eq!(session.tool_calls[0].tool_name, "list_books");
        assert!(!session.tool_calls[1].is_success());
    }

    #[tokio::test]
    async fn handle_snapshot_and_mutation() {
        let handle = SessionHandle::new(Session::new("goal", ProviderKind::Gemini));
        handle
            .with_state_mut(|s| s.push_message(Message::user("hi")))
            .await;
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.messages.len(), 1);
    }

    #[tokio::test]
    async fn handle_cancellation_flag() {
        let handle = SessionHandle::new(Session::new("goal", ProviderKind::Gemini));
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.cancel_token().is_cancelled());
    }
}
