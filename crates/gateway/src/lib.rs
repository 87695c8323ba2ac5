//! HTTP session surface for TaskForge.
//!
//! Exposes the agent loop to callers: submit a goal, read session
//! snapshots, stream session events over SSE, cancel, and clear. The only
//! component external collaborators touch directly.
//!
//! Built on Axum.

pub mod api;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use taskforge_agent::AgentRunner;
use taskforge_config::AppConfig;
use taskforge_mcp::{ToolGateway, transport_from_config};
use taskforge_providers::ProviderRegistry;

pub use api::{ApiState, SharedApiState, build_router};
pub use store::SessionStore;

/// Wire up the full surface from configuration.
pub fn build_state(config: &AppConfig) -> SharedApiState {
    let providers = Arc::new(ProviderRegistry::from_config(config));
    let transport = transport_from_config(&config.mcp);
    let gateway = Arc::new(ToolGateway::new(
        transport,
        Duration::from_secs(config.agent.tool_timeout_secs),
    ));
    let runner = Arc::new(AgentRunner::new(
        gateway.clone(),
        providers.clone(),
        config.agent.clone(),
    ));
    let store = Arc::new(SessionStore::new(runner, config.surface.max_sessions));

    Arc::new(ApiState {
        store,
        providers,
        gateway,
    })
}

/// Start the surface HTTP server and serve until shutdown.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = build_state(&config);
    let router = build_router(state);

    let addr = format!("{}:{}", config.surface.host, config.surface.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Session surface listening");

    axum::serve(listener, router).await?;
    Ok(())
}
