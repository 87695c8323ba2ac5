//! `taskforge tools` — discover and list available tools.

use std::time::Duration;

use anyhow::anyhow;

use taskforge_config::AppConfig;
use taskforge_mcp::{ToolGateway, transport_from_config};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let transport = transport_from_config(&config.mcp);
    let gateway = ToolGateway::new(
        transport,
        Duration::from_secs(config.agent.tool_timeout_secs),
    );

    let registry = gateway.discover().await.map_err(|e| anyhow!("{e}"))?;

    if registry.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("{} tool(s) discovered:", registry.len());
    for tool in registry.iter() {
        let required = tool.schema.required_fields();
        if required.is_empty() {
            println!("  {} — {}", tool.name, tool.description);
        } else {
            println!(
                "  {} — {} (required: {})",
                tool.name,
                tool.description,
                required.join(", ")
            );
        }
    }

    Ok(())
}
