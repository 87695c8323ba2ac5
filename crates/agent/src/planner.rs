//! Planning, progress evaluation, and final-response synthesis.
//!
//! The planner asks the completion provider to decompose a goal into steps
//! referencing discovered tools, then judges progress with a deterministic
//! decision table. It always produces a usable plan (a "respond directly"
//! step when the model yields nothing) and always produces a final response
//! (a templated summary when the provider fails during finalize).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use taskforge_core::error::ProviderError;
use taskforge_core::message::{Message, Role};
use taskforge_core::session::{Session, Step};
use taskforge_core::tool::ToolRegistry;
use taskforge_providers::ProviderRegistry;

/// How many trailing conversation messages are rendered into prompts.
const CONTEXT_WINDOW: usize = 10;

const PLANNER_SYSTEM_PROMPT: &str = "\
You are an autonomous agent planner. Your role is to analyze user goals and \
create execution plans using available tools.

IMPORTANT CONSTRAINTS:
- ONLY use tools that are explicitly listed in the AVAILABLE TOOLS section
- DO NOT assume the existence of calculation tools like \"python\", \"count\" or \"math\"
- For data processing tasks, plan to retrieve the data first; counting and \
analysis happen while writing the final response, not as separate tool calls

RESPONSE FORMAT:
Respond with a JSON object:
{
    \"analysis\": \"Brief analysis of the user's request\",
    \"plan\": [
        {
            \"step\": 1,
            \"action\": \"tool_call\" | \"respond\",
            \"tool_name\": \"tool_name\" (only for tool_call actions),
            \"description\": \"What this step accomplishes\",
            \"inputs\": {\"key\": \"value\"} (only for tool_call actions)
        }
    ],
    \"reasoning\": \"Why this approach was chosen\"
}";

const FINALIZE_SYSTEM_PROMPT: &str = "\
You are an autonomous agent providing a final response to the user. \
Summarize what was accomplished, highlight key results, and provide a \
clear, helpful response. If the user asked for counts or analysis, process \
the retrieved data directly in your answer and give specific numbers.";

/// What the loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// More pending steps remain — keep acting.
    Continue,
    /// A recoverable failure occurred and budget remains — plan again.
    Replan,
    /// The plan is settled without failures — finish.
    Complete,
    /// An unrecoverable failure — finish with this error.
    Error(String),
}

/// The configurable boundary between recoverable and unrecoverable step
/// failures.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    /// Treat validation and unknown-tool failures as recoverable: they
    /// indicate a bad plan, and replanning can fix the arguments.
    pub recoverable_validation_failures: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            recoverable_validation_failures: true,
        }
    }
}

impl RecoveryPolicy {
    /// Classify a recorded failure. Timeouts after retry and remote
    /// execution failures are always terminal for their step.
    pub fn is_recoverable(&self, error: &str) -> bool {
        if !self.recoverable_validation_failures {
            return false;
        }
        error.starts_with("Invalid arguments") || error.starts_with("Unknown tool")
    }
}

/// Plans, evaluates, and finalizes on behalf of the agent loop.
pub struct Planner {
    providers: Arc<ProviderRegistry>,
    completion_timeout: Duration,
}

impl Planner {
    pub fn new(providers: Arc<ProviderRegistry>, completion_timeout: Duration) -> Self {
        Self {
            providers,
            completion_timeout,
        }
    }

    /// Decompose the goal into an ordered plan.
    ///
    /// Always yields at least one step: when the model returns nothing
    /// usable, a single "respond directly" step keeps the loop moving.
    pub async fn plan(
        &self,
        session: &Session,
        registry: &ToolRegistry,
    ) -> Result<Vec<Step>, ProviderError> {
        let request = format!(
            "USER GOAL: {}\n\nAVAILABLE TOOLS:\n{}\n\nCONVERSATION CONTEXT:\n{}\n\n\
             Please create a detailed execution plan to accomplish the user's goal.",
            session.goal,
            registry.describe(),
            render_context(&session.messages),
        );

        let messages = vec![Message::system(PLANNER_SYSTEM_PROMPT), Message::user(request)];

        let completion = tokio::time::timeout(
            self.completion_timeout,
            self.providers.complete(session.provider, messages),
        )
        .await
        .map_err(|_| {
            ProviderError::Timeout(format!(
                "Planning request timed out after {}s",
                self.completion_timeout.as_secs()
            ))
        })??;

        let mut steps = parse_plan(&completion.content);
        if steps.is_empty() {
            debug!("No usable steps in plan response, synthesizing direct response step");
            steps.push(Step::new(0, "Respond directly to the user's request"));
        }

        Ok(steps)
    }

    /// Judge progress from step statuses and the latest tool-call record.
    ///
    /// Tie-break: `Continue` wins over `Replan` whenever unexecuted steps
    /// remain, to avoid re-planning churn.
    pub fn evaluate(
        &self,
        session: &Session,
        max_iterations: u32,
        policy: RecoveryPolicy,
    ) -> Decision {
        // A settled, failure-free plan completes even on the last pass.
        if !session.plan.is_empty() && session.plan_settled() && !session.any_step_failed() {
            return Decision::Complete;
        }

        if session.iteration_count >= max_iterations {
            return Decision::Error(
                taskforge_core::error::SessionError::BudgetExhausted { max_iterations }
                    .to_string(),
            );
        }

        if session.next_pending_step().is_some() {
            return Decision::Continue;
        }

        if session.any_step_failed() {
            let last_error = session
                .tool_calls
                .iter()
                .rev()
                .find_map(|r| r.error.clone())
                .unwrap_or_else(|| "Step failed without a recorded cause".into());

            return if policy.is_recoverable(&last_error) {
                Decision::Replan
            } else {
                Decision::Error(last_error)
            };
        }

        Decision::Complete
    }

    /// Synthesize the final response from the full session history.
    ///
    /// On provider failure this degrades to a templated summary — the loop
    /// always terminates with some response.
    pub async fn finalize(&self, session: &Session) -> String {
        let request = format!(
            "USER'S ORIGINAL GOAL: {}\n\nEXECUTION SUMMARY:\n\
             - Steps completed: {}\n- Tools used: {}\n\nTOOL RESULTS:\n{}\n\n\
             Please provide a comprehensive final response to the user about \
             what was accomplished.",
            session.goal,
            session
                .plan
                .iter()
                .filter(|s| s.status == taskforge_core::session::StepStatus::Done)
                .count(),
            session.tool_calls.len(),
            render_tool_results(session),
        );

        let messages = vec![Message::system(FINALIZE_SYSTEM_PROMPT), Message::user(request)];

        let result = tokio::time::timeout(
            self.completion_timeout,
            self.providers
                .complete_with_fallback(session.provider, messages),
        )
        .await;

        match result {
            Ok(Ok((completion, _))) => completion.content.trim().to_string(),
            Ok(Err(e)) => {
                warn!(error = %e, "Finalize completion failed, using templated summary");
                self.fallback_summary(session)
            }
            Err(_) => {
                warn!("Finalize completion timed out, using templated summary");
                self.fallback_summary(session)
            }
        }
    }

    /// Templated summary built from recorded tool outputs. Never fails.
    pub fn fallback_summary(&self, session: &Session) -> String {
        let mut lines = vec![format!("Task: {}", session.goal)];

        if session.tool_calls.is_empty() {
            lines.push("No tools were executed.".into());
        } else {
            for record in &session.tool_calls {
                match (&record.output, &record.error) {
                    (Some(output), _) => {
                        lines.push(format!("- {}: {}", record.tool_name, truncate(output, 300)));
                    }
                    (None, Some(error)) => {
                        lines.push(format!("- {}: failed ({error})", record.tool_name));
                    }
                    (None, None) => lines.push(format!("- {}: no output", record.tool_name)),
                }
            }
        }

        lines.join("\n")
    }
}

/// Render the trailing conversation window as `role: content` lines.
fn render_context(messages: &[Message]) -> String {
    let start = messages.len().saturating_sub(CONTEXT_WINDOW);
    messages[start..]
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_tool_results(session: &Session) -> String {
    if session.tool_calls.is_empty() {
        return "No tools were executed.".into();
    }

    session
        .tool_calls
        .iter()
        .map(|record| {
            let mut text = format!("Tool: {}", record.tool_name);
            if let Some(output) = &record.output {
                text.push_str(&format!("\nResult: {}", truncate(output, 1000)));
            } else if let Some(error) = &record.error {
                text.push_str(&format!("\nError: {error}"));
            }
            text
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(value: &Value, limit: usize) -> String {
    let mut text = value.to_string();
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

/// Extract the first JSON object from a completion and map its plan array
/// to steps. Anything unparseable yields an empty plan; the caller
/// synthesizes a direct-response step.
fn parse_plan(content: &str) -> Vec<Step> {
    let Some(payload) = extract_json(content) else {
        return Vec::new();
    };

    let Some(raw_steps) = payload["plan"].as_array() else {
        return Vec::new();
    };

    raw_steps
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let description = raw["description"]
                .as_str()
                .unwrap_or("Unnamed step")
                .to_string();
            let mut step = Step::new(index, description);

            if raw["action"].as_str() == Some("tool_call") {
                if let Some(tool_name) = raw["tool_name"].as_str() {
                    let inputs = raw.get("inputs").cloned().unwrap_or(Value::Object(
                        serde_json::Map::new(),
                    ));
                    step = step.with_tool(tool_name, inputs);
                }
            }

            step
        })
        .collect()
}

/// Find the outermost JSON object embedded in free text.
fn extract_json(content: &str) -> Option<Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}
