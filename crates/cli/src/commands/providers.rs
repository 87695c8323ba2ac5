//! `taskforge providers` — show completion-provider availability.

use taskforge_config::AppConfig;
use taskforge_core::provider::ProviderKind;
use taskforge_providers::ProviderRegistry;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let registry = ProviderRegistry::from_config(&config);
    let available = registry.available();
    let default = registry.default_kind();

    println!("Providers:");
    for kind in ProviderKind::ALL {
        let status = if available.contains(&kind) {
            "available"
        } else {
            "not configured"
        };
        let marker = if kind == default { " (default)" } else { "" };
        println!("  {:<10} {status}{marker}", kind.as_str());
    }

    if available.is_empty() {
        println!("\nNo providers configured. Set an API key, e.g. TASKFORGE_GEMINI_API_KEY.");
    }

    Ok(())
}
