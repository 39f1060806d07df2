//! `orion queue` — Failed-request queue management.

use chrono::Utc;
use orion_config::AppConfig;
use orion_core::request::QueuedRequest;
use orion_core::store::{QueueFilter, RequestQueue};
use orion_workflow::EntryResult;

use crate::runtime::Runtime;

pub async fn list(config: AppConfig, terminal: bool, pending: bool) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let filter = match (terminal, pending) {
        (true, _) => QueueFilter::Terminal,
        (_, true) => QueueFilter::Pending,
        _ => QueueFilter::All,
    };

    let entries = runtime.store.list(filter).await?;
    if entries.is_empty() {
        println!("📭 Queue is empty");
    } else {
        println!("📬 {} queued request(s)", entries.len());
        println!();
        for entry in &entries {
            print_entry(entry);
        }
    }
    runtime.close().await;
    Ok(())
}

fn print_entry(entry: &QueuedRequest) {
    let state = if entry.terminal { "terminal" } else { "pending" };
    println!("  {} [{state}]", entry.id);
    println!(
        "     session:  {}  channel: {}",
        entry.request.session_id,
        entry.channel()
    );
    println!("     request:  {}", preview(&entry.request.text, 70));
    println!(
        "     attempts: {}  next retry: {}",
        entry.attempts,
        entry.next_retry_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(err) = &entry.last_error {
        println!("     error:    {}", preview(err, 70));
    }
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}…")
}

pub async fn stats(config: AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let stats = runtime.store.stats(Utc::now()).await?;

    println!("📊 Queue Statistics");
    println!("===================");
    println!("  Pending:   {}", stats.pending);
    println!("  Due now:   {}", stats.due);
    println!("  Terminal:  {}", stats.terminal);
    runtime.close().await;
    Ok(())
}

pub async fn drain(config: AppConfig) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let drainer = runtime.drainer(runtime.orchestrator()?);

    let report = drainer.drain_once(Utc::now()).await?;
    if report.processed() == 0 {
        println!("📭 Nothing due");
    }
    for (id, result) in &report.results {
        match result {
            EntryResult::Succeeded => println!("  ✅ {id} succeeded"),
            EntryResult::Rescheduled {
                attempts,
                next_retry_at,
            } => println!("  🔁 {id} failed (attempt {attempts}), retry at {next_retry_at}"),
            EntryResult::Terminal { attempts } => {
                println!("  ❌ {id} gave up after {attempts} attempts")
            }
            EntryResult::Errored(reason) => println!("  ⚠️  {id} error: {reason}"),
        }
    }
    runtime.close().await;
    Ok(())
}

pub async fn purge(config: AppConfig, older_than_days: Option<i64>) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let retention = older_than_days
        .map(chrono::Duration::days)
        .unwrap_or_else(|| runtime.config.queue.terminal_retention());

    let purged = runtime.store.purge_terminal(Utc::now() - retention).await?;
    println!("🗑️  Purged {purged} terminal entr{}", if purged == 1 { "y" } else { "ies" });
    runtime.close().await;
    Ok(())
}
