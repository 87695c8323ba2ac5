//! `taskforge run` — execute a single goal and print the result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};

use taskforge_agent::AgentRunner;
use taskforge_config::AppConfig;
use taskforge_core::provider::ProviderKind;
use taskforge_core::session::{Session, SessionHandle, SessionStatus};
use taskforge_mcp::{ToolGateway, transport_from_config};
use taskforge_providers::ProviderRegistry;

pub async fn run(config: AppConfig, goal: String, provider: Option<String>) -> anyhow::Result<()> {
    let providers = Arc::new(ProviderRegistry::from_config(&config));

    let kind: ProviderKind = match provider {
        Some(raw) => raw.parse().map_err(|e| anyhow!("{e}"))?,
        None => providers.default_kind(),
    };

    let transport = transport_from_config(&config.mcp);
    let gateway = Arc::new(ToolGateway::new(
        transport,
        Duration::from_secs(config.agent.tool_timeout_secs),
    ));
    let runner = AgentRunner::new(gateway, providers, config.agent.clone());

    let handle = Arc::new(SessionHandle::new(Session::new(goal, kind)));
    runner.run(handle.clone()).await;

    let session = handle.snapshot().await;

    if !session.plan.is_empty() {
        println!("Plan:");
        for step in &session.plan {
            println!("  [{}] {}", step.status.as_str(), step.description);
        }
    }

    if !session.tool_calls.is_empty() {
        println!("Tool calls:");
        for record in &session.tool_calls {
            match &record.error {
                None => println!("  {} — ok", record.tool_name),
                Some(error) => println!("  {} — {error}", record.tool_name),
            }
        }
    }

    println!();
    if let Some(response) = &session.final_response {
        println!("{response}");
    }

    if session.status == SessionStatus::Error {
        bail!(
            "session ended in error: {}",
            session.error.unwrap_or_else(|| "unknown".into())
        );
    }

    Ok(())
}
