//! Walkthrough of the local scheduler: submit a few shell commands under a
//! concurrency cap and watch them run.
//!
//! ```text
//! cargo run --example local_demo -- --proc-nb 2 "sleep 1" "exit 3" "echo done"
//! ```

use std::time::Duration;

use clap::Parser;
use taskmill::{JobSpec, LocalScheduler, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "local-demo")]
#[command(about = "Run shell commands through the local job scheduler")]
struct Args {
    /// Maximum number of concurrently running jobs
    #[arg(long, default_value_t = 2)]
    proc_nb: usize,

    /// Dispatch loop period in milliseconds
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Shell commands to run, highest-numbered first
    #[arg(required = true)]
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let scheduler = LocalScheduler::new(args.proc_nb, Duration::from_millis(args.interval_ms));

    // Later commands get higher priority so the dispatch order is visible.
    let mut ids = Vec::new();
    for (index, command) in args.commands.iter().enumerate() {
        let job = JobSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            command.clone(),
        ])
        .with_priority(index as i32);
        let id = scheduler.submit(job).await?;
        println!("submitted '{command}' as {id}");
        ids.push((command.clone(), id));
    }

    let mut pending = ids;
    while !pending.is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut still_pending = Vec::new();
        for (command, id) in pending {
            let status = scheduler.status(&id).await?;
            if status.is_terminal() {
                let info = scheduler.exit_info(&id).await?;
                println!(
                    "'{command}' -> {status} ({:?}, exit code {:?})",
                    info.kind, info.exit_code
                );
            } else {
                still_pending.push((command, id));
            }
        }
        pending = still_pending;
    }

    scheduler.shutdown().await;
    Ok(())
}
