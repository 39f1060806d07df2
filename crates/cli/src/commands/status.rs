//! `orion status` — Show system status.

use chrono::Utc;
use orion_config::AppConfig;
use orion_core::store::{ConversationStore, RequestQueue};

use crate::runtime::Runtime;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    println!("🛰️  Orion Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {} ({})", config.model.provider, config.model.base_url);
    println!("  Worker:       {}", config.model.worker_model);
    println!("  Evaluator:    {}", config.model.evaluator_model);
    println!(
        "  API key:      {}",
        if config.has_api_key() { "set" } else { "missing" }
    );
    println!(
        "  Rate limit:   {} calls / {}s ({:?} when denied)",
        config.rate_limit.requests_per_window, config.rate_limit.window_secs, config.rate_limit.on_denied
    );
    println!(
        "  Retry queue:  {} attempts, {}s apart",
        config.queue.max_attempts, config.queue.retry_delay_secs
    );
    for name in ["console", "telegram", "webhook"] {
        let state = if config.notifications.is_configured(name) { "✅" } else { "—" };
        println!("  Channel:      {name:<9} {state}");
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("\n  ⚠️  No config file, using defaults");
    }

    let runtime = Runtime::open(config).await?;
    let queue = RequestQueue::stats(runtime.store.as_ref(), Utc::now()).await?;
    let conversations = ConversationStore::stats(runtime.store.as_ref()).await?;
    println!();
    println!(
        "  Database:     {}",
        runtime.config.memory.database_path().display()
    );
    println!(
        "  Sessions:     {} ({} messages)",
        conversations.sessions, conversations.messages
    );
    println!(
        "  Queue:        {} pending ({} due), {} terminal",
        queue.pending, queue.due, queue.terminal
    );
    runtime.close().await;
    Ok(())
}
