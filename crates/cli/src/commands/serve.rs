//! `taskforge serve` — start the HTTP session surface.

use anyhow::anyhow;
use taskforge_config::AppConfig;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    taskforge_gateway::start(config)
        .await
        .map_err(|e| anyhow!(e.to_string()))
}
