//! `orion agent` — Interactive or single-message chat mode.

use anyhow::Context;
use orion_config::AppConfig;
use orion_core::message::SessionId;
use orion_core::request::{Submission, UserRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use crate::runtime::Runtime;

const CHANNEL: &str = "console";
const DESTINATION: &str = "stdout";

pub async fn run(config: AppConfig, message: Option<String>, session: String) -> anyhow::Result<()> {
    let runtime = Runtime::open(config).await?;
    let orchestrator = runtime.orchestrator()?;
    let session = SessionId::from(session.as_str());

    if let Some(msg) = message {
        // Single message mode
        let request = UserRequest::new(session, CHANNEL, DESTINATION, msg);
        eprint!("  Thinking...");
        let submission = orchestrator.submit(&request).await;
        eprint!("\r              \r");
        print_submission(&submission);
        runtime.close().await;
        return Ok(());
    }

    // Queued requests get retried while the chat is open.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drainer = runtime
        .drainer(orchestrator.clone())
        .start(runtime.config.queue.drain_interval(), shutdown_rx);

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         Orion Agent — Interactive Mode       ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", runtime.config.model.provider);
    println!("  Worker:    {}", runtime.config.model.worker_model);
    println!("  Evaluator: {}", runtime.config.model.evaluator_model);
    println!("  Session:   {session}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"  You > ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        let request = UserRequest::new(session.clone(), CHANNEL, DESTINATION, text);
        eprint!("  ...");
        let submission = orchestrator.submit(&request).await;
        eprint!("\r     \r");
        print_submission(&submission);
    }

    shutdown_tx.send(true).ok();
    drainer.await.ok();
    runtime.close().await;

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

fn print_submission(submission: &Submission) {
    match submission {
        Submission::Completed(result) => {
            println!();
            for line in result.answer.lines() {
                println!("  Orion > {line}");
            }
            println!();
        }
        Submission::Queued {
            retry_at, reason, ..
        } => {
            let minutes = ((*retry_at - chrono::Utc::now()).num_seconds() + 59).max(60) / 60;
            println!();
            println!("  Orion > I encountered an error and will retry in {minutes} minutes.");
            println!("          ({reason})");
            println!();
        }
        Submission::Failed(failure) => {
            eprintln!("  [Error] {failure}");
            println!();
        }
    }
}
