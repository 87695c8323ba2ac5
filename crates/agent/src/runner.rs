//! The agent loop: a bounded state machine over one session.
//!
//! `Initialize → Planning → Acting → Evaluating → {Planning | Acting |
//! Finishing}`, terminating in Completed or Error. The runner is the single
//! writer of session state; every observable mutation is mirrored onto the
//! session's event bus, and every tool-call outcome — success, failure,
//! timeout, or cancellation — is recorded before the next transition.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use taskforge_config::AgentSettings;
use taskforge_core::error::SessionError;
use taskforge_core::event::SessionEvent;
use taskforge_core::message::Message;
use taskforge_core::session::{SessionHandle, SessionStatus, Step, ToolCallRecord};
use taskforge_core::tool::ToolRegistry;
use taskforge_mcp::ToolGateway;
use taskforge_providers::ProviderRegistry;

use crate::planner::{Decision, Planner, RecoveryPolicy};

const SESSION_SYSTEM_PROMPT: &str =
    "You are TaskForge, a task-execution agent. You accomplish user goals by \
     planning and invoking the available tools, then reporting the results.";

/// Drives sessions through the planning/execution state machine.
pub struct AgentRunner {
    gateway: Arc<ToolGateway>,
    planner: Planner,
    settings: AgentSettings,
}

impl AgentRunner {
    pub fn new(
        gateway: Arc<ToolGateway>,
        providers: Arc<ProviderRegistry>,
        settings: AgentSettings,
    ) -> Self {
        let planner = Planner::new(
            providers,
            Duration::from_secs(settings.completion_timeout_secs),
        );
        Self {
            gateway,
            planner,
            settings,
        }
    }

    fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            recoverable_validation_failures: self.settings.recoverable_validation_failures,
        }
    }

    /// Drive a session to a terminal status.
    ///
    /// Never returns an error: every failure path is captured into the
    /// session's message/tool-call trail and terminal status.
    pub async fn run(&self, handle: Arc<SessionHandle>) {
        let goal = handle.with_state(|s| s.goal.clone()).await;
        info!(session = %handle.id(), goal = %goal, "Starting agent run");

        // ── Initialize ──
        self.push_message(&handle, Message::system(SESSION_SYSTEM_PROMPT))
            .await;
        self.push_message(&handle, Message::user(goal)).await;

        // Discovery failure is degraded mode, not fatal: the goal may be
        // answerable without tools.
        let registry = match self.gateway.discover().await {
            Ok(registry) => registry,
            Err(e) => {
                warn!(session = %handle.id(), error = %e, "Tool discovery failed, continuing without tools");
                self.push_message(
                    &handle,
                    Message::system(format!(
                        "Tool discovery failed ({e}); continuing without tools."
                    )),
                )
                .await;
                Arc::new(ToolRegistry::empty())
            }
        };

        if self.check_cancelled(&handle).await {
            return;
        }

        // ── Planning ──
        if !self.transition(&handle, SessionStatus::Planning).await {
            return;
        }
        let Some(plan) = self.plan_with_retry(&handle, &registry).await else {
            return;
        };
        self.install_plan(&handle, plan).await;

        loop {
            if self.check_cancelled(&handle).await {
                return;
            }

            // ── Acting ──
            if !self.transition(&handle, SessionStatus::Acting).await {
                return;
            }
            let next = handle
                .with_state(|s| s.next_pending_step().map(|i| s.plan[i].clone()))
                .await;
            if let Some(step) = next {
                if !self.execute_step(&handle, &step).await {
                    return;
                }
            }

            let iterations = handle
                .with_state_mut(|s| {
                    s.iteration_count += 1;
                    s.iteration_count
                })
                .await;

            if self.check_cancelled(&handle).await {
                return;
            }

            // ── Evaluating ──
            if !self.transition(&handle, SessionStatus::Evaluating).await {
                return;
            }
            let decision = {
                let snapshot = handle.snapshot().await;
                self.planner
                    .evaluate(&snapshot, self.settings.max_iterations, self.policy())
            };
            debug!(session = %handle.id(), ?decision, iterations, "Evaluated progress");

            match decision {
                Decision::Complete => {
                    self.finish(&handle, None).await;
                    return;
                }
                Decision::Error(reason) => {
                    if iterations >= self.settings.max_iterations {
                        // Hard bound: termination regardless of plan completeness
                        self.push_message(
                            &handle,
                            Message::system(format!(
                                "Iteration budget of {} reached; stopping before the plan completed.",
                                self.settings.max_iterations
                            )),
                        )
                        .await;
                    }
                    self.finish(&handle, Some(reason)).await;
                    return;
                }
                Decision::Continue => {}
                Decision::Replan => {
                    if self.check_cancelled(&handle).await {
                        return;
                    }
                    if !self.transition(&handle, SessionStatus::Planning).await {
                        return;
                    }
                    let Some(plan) = self.plan_with_retry(&handle, &registry).await else {
                        return;
                    };
                    self.install_plan(&handle, plan).await;
                }
            }
        }
    }

    /// Execute one step. Returns false when the run was cancelled mid-call
    /// (the session is already terminal).
    async fn execute_step(&self, handle: &Arc<SessionHandle>, step: &Step) -> bool {
        handle
            .with_state_mut(|s| {
                if let Some(st) = s.plan.get_mut(step.index) {
                    st.begin();
                }
            })
            .await;

        let Some(tool_name) = step.tool_name.clone() else {
            // Direct-response step: nothing to invoke
            handle
                .with_state_mut(|s| {
                    if let Some(st) = s.plan.get_mut(step.index) {
                        st.finish(true);
                    }
                })
                .await;
            return true;
        };

        let arguments = step
            .arguments
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        handle.emit(SessionEvent::ToolCallStarted {
            tool_name: tool_name.clone(),
            step_index: step.index,
        });
        let started_at = chrono::Utc::now();
        let cancel = handle.cancel_token();

        let gateway = self.gateway.clone();
        let call_name = tool_name.clone();
        let call_args = arguments.clone();
        let call = async move { gateway.call(&call_name, call_args).await };

        tokio::select! {
            _ = cancel.cancelled() => {
                // An in-flight call that is cancelled is recorded as failed,
                // never silently dropped.
                let record = ToolCallRecord::failed(
                    step.index,
                    &tool_name,
                    arguments,
                    SessionError::Cancelled.to_string(),
                    started_at,
                );
                handle
                    .with_state_mut(|s| {
                        s.record_tool_call(record);
                        if let Some(st) = s.plan.get_mut(step.index) {
                            st.finish(false);
                        }
                    })
                    .await;
                handle.emit(SessionEvent::ToolCallFinished {
                    tool_name,
                    step_index: step.index,
                    success: false,
                });
                self.finish_cancelled(handle).await;
                false
            }
            result = call => {
                let (record, success) = match result {
                    Ok(invocation) => {
                        let success = invocation.outcome.success;
                        let record = if success {
                            ToolCallRecord::succeeded(
                                step.index,
                                &invocation.tool_name,
                                arguments,
                                invocation.outcome.data.unwrap_or(Value::Null),
                                invocation.started_at,
                            )
                        } else {
                            ToolCallRecord::failed(
                                step.index,
                                &invocation.tool_name,
                                arguments,
                                invocation
                                    .outcome
                                    .error
                                    .unwrap_or_else(|| "Tool reported failure".into()),
                                invocation.started_at,
                            )
                        };
                        (record, success)
                    }
                    Err(e) => {
                        warn!(session = %handle.id(), tool = %tool_name, error = %e, "Tool call failed");
                        (
                            ToolCallRecord::failed(
                                step.index,
                                &tool_name,
                                arguments,
                                e.to_string(),
                                started_at,
                            ),
                            false,
                        )
                    }
                };

                handle
                    .with_state_mut(|s| {
                        s.record_tool_call(record);
                        if let Some(st) = s.plan.get_mut(step.index) {
                            st.finish(success);
                        }
                    })
                    .await;
                handle.emit(SessionEvent::ToolCallFinished {
                    tool_name,
                    step_index: step.index,
                    success,
                });
                true
            }
        }
    }

    /// Plan with one retry on provider failure. Returns None when planning
    /// failed twice (the session is already terminal).
    async fn plan_with_retry(
        &self,
        handle: &Arc<SessionHandle>,
        registry: &ToolRegistry,
    ) -> Option<Vec<Step>> {
        let snapshot = handle.snapshot().await;
        match self.planner.plan(&snapshot, registry).await {
            Ok(plan) => Some(plan),
            Err(first) => {
                warn!(session = %handle.id(), error = %first, "Planning failed, retrying once");
                match self.planner.plan(&snapshot, registry).await {
                    Ok(plan) => Some(plan),
                    Err(second) => {
                        self.push_message(
                            handle,
                            Message::system(format!("Planning failed: {second}")),
                        )
                        .await;
                        self.finish(handle, Some(second.to_string())).await;
                        None
                    }
                }
            }
        }
    }

    async fn install_plan(&self, handle: &Arc<SessionHandle>, plan: Vec<Step>) {
        let descriptions: Vec<String> = plan.iter().map(|s| s.description.clone()).collect();
        handle.with_state_mut(|s| s.replace_plan(plan)).await;
        handle.emit(SessionEvent::PlanCreated {
            steps: descriptions.clone(),
        });
        self.push_message(
            handle,
            Message::assistant(format!(
                "I've created a plan with {} step(s) to accomplish your goal.",
                descriptions.len()
            )),
        )
        .await;
    }

    /// Finish via finalize. `error` of None means Completed; Some means
    /// Error, with the best-effort response still attached.
    async fn finish(&self, handle: &Arc<SessionHandle>, error: Option<String>) {
        let snapshot = handle.snapshot().await;
        let final_response = self.planner.finalize(&snapshot).await;
        self.push_message(handle, Message::assistant(final_response.clone()))
            .await;

        let became_terminal = handle
            .with_state_mut(|s| match &error {
                None => s.complete(final_response.clone()),
                Some(reason) => {
                    s.final_response = Some(final_response.clone());
                    s.fail(reason.clone())
                }
            })
            .await;

        if became_terminal {
            match error {
                None => {
                    handle.emit(SessionEvent::StatusChanged {
                        status: SessionStatus::Completed,
                    });
                    handle.emit(SessionEvent::Done { final_response });
                    info!(session = %handle.id(), "Session completed");
                }
                Some(message) => {
                    handle.emit(SessionEvent::StatusChanged {
                        status: SessionStatus::Error,
                    });
                    handle.emit(SessionEvent::Error {
                        message: message.clone(),
                    });
                    info!(session = %handle.id(), error = %message, "Session errored");
                }
            }
        }
    }

    /// Terminate a cancelled session without further provider calls.
    async fn finish_cancelled(&self, handle: &Arc<SessionHandle>) {
        let snapshot = handle.snapshot().await;
        let summary = self.planner.fallback_summary(&snapshot);
        self.push_message(handle, Message::system("Session cancelled."))
            .await;

        let became_terminal = handle
            .with_state_mut(|s| {
                s.final_response = Some(summary);
                s.fail(SessionError::Cancelled.to_string())
            })
            .await;

        if became_terminal {
            handle.emit(SessionEvent::StatusChanged {
                status: SessionStatus::Error,
            });
            handle.emit(SessionEvent::Error {
                message: SessionError::Cancelled.to_string(),
            });
            info!(session = %handle.id(), "Session cancelled");
        }
    }

    async fn check_cancelled(&self, handle: &Arc<SessionHandle>) -> bool {
        if handle.is_cancelled() {
            self.finish_cancelled(handle).await;
            true
        } else {
            false
        }
    }

    async fn transition(&self, handle: &Arc<SessionHandle>, status: SessionStatus) -> bool {
        let changed = handle.with_state_mut(|s| s.set_status(status)).await;
        if changed {
            handle.emit(SessionEvent::StatusChanged { status });
        }
        changed
    }

    async fn push_message(&self, handle: &Arc<SessionHandle>, message: Message) {
        let event = SessionEvent::MessageAppended {
            role: message.role,
            content: message.content.clone(),
        };
        handle.with_state_mut(|s| s.push_message(message)).await;
        handle.emit(event);
    }
}
