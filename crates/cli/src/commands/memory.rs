//! `orion memory` — Conversation log management.

use orion_config::AppConfig;
use orion_core::message::SessionId;
use orion_core::store::ConversationStore;

use crate::runtime::Runtime;

pub async fn stats(config: AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let stats = runtime.store.stats().await?;
    let path = runtime.config.memory.database_path();

    println!("🧠 Conversation Statistics");
    println!("==========================");
    println!("  Sessions:   {}", stats.sessions);
    println!("  Messages:   {}", stats.messages);
    if let Some(last) = stats.last_activity {
        println!("  Last seen:  {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Ok(meta) = std::fs::metadata(&path) {
        let size_kb = meta.len() as f64 / 1024.0;
        println!("  DB file:    {} ({:.1} KB)", path.display(), size_kb);
    }

    let sessions = runtime.store.sessions().await?;
    if !sessions.is_empty() {
        println!();
        for summary in sessions.iter().take(10) {
            println!(
                "  {:<30} {:>5} messages  {}",
                summary.id.to_string(),
                summary.message_count,
                summary.last_activity.format("%Y-%m-%d %H:%M")
            );
        }
    }
    runtime.close().await;
    Ok(())
}

pub async fn history(config: AppConfig, session: &str, limit: Option<usize>) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let session = SessionId::from(session);
    let messages = match limit {
        Some(limit) => runtime.store.load_recent(&session, limit).await?,
        None => runtime.store.load(&session).await?,
    };

    if messages.is_empty() {
        println!("   No messages in session {session}");
    }
    for message in &messages {
        println!(
            "  #{:<4} {} [{}] {}",
            message.seq,
            message.timestamp.format("%H:%M:%S"),
            message.role.as_str(),
            message.content
        );
    }
    runtime.close().await;
    Ok(())
}

pub async fn prune(config: AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let removed = runtime
        .store
        .prune(&runtime.config.memory.prune_policy())
        .await?;
    println!("✂️  Pruned {removed} message(s)");
    runtime.close().await;
    Ok(())
}

pub async fn clear(config: AppConfig, session: &str, confirm: bool) -> anyhow::Result<()> {
    if !confirm {
        println!("⚠️  This will delete every message of session {session} permanently.");
        println!("   Run with --confirm to proceed:");
        println!("   orion memory clear --session {session} --confirm");
        return Ok(());
    }

    let runtime = Runtime::open(config).await?;
    let removed = runtime.store.clear(&SessionId::from(session)).await?;
    println!("🗑️  Deleted {removed} message(s) from {session}");
    runtime.close().await;
    Ok(())
}
