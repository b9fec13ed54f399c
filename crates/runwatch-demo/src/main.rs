//! Triggers the simulated hello-world task and tracks it to the end.

mod hello_world;

use std::time::Duration;

use clap::Parser;
use runwatch_core::prelude::*;
use runwatch_core::{LogNotifier, init_observability};

use crate::hello_world::{HelloOutput, Outcome};

#[derive(Debug, Parser)]
#[command(name = "runwatch-demo", about = "Track a simulated hello-world run")]
struct Args {
    /// Name passed to the task.
    #[arg(long, default_value = "World")]
    name: String,
    /// Delay between progress fragments.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
    /// How the run ends.
    #[arg(long, value_enum, default_value_t = Outcome::Complete)]
    outcome: Outcome,
    /// Track by run id only and let the watcher fetch the token.
    #[arg(long)]
    fetch_token: bool,
    /// Disable progress notifications.
    #[arg(long)]
    no_notifications: bool,
    /// Give up after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability();
    let args = Args::parse();

    let config = TrackerConfig::from_env()?.notifications(!args.no_notifications);
    let runs = InMemoryRuns::new();
    let mut builder = Watcher::builder()
        .source(runs.clone())
        .notifier(std::sync::Arc::new(LogNotifier::new()))
        .config(config);
    if args.fetch_token {
        builder = builder.token_fetcher(std::sync::Arc::new(runs.clone()));
    }
    let watcher = builder.build()?;

    let callbacks = Callbacks::<HelloOutput>::new()
        .on_fragment(|text| println!("> {text}"))
        .on_complete(|output| match output {
            Some(output) => println!("completed: {}", output.message),
            None => println!("completed without output"),
        })
        .on_error(|err| eprintln!("error: {err}"));
    let handle = watcher.track(TrackOptions::new().callbacks(callbacks))?;

    let run = hello_world::trigger(
        &runs,
        args.name,
        Duration::from_millis(args.interval_ms),
        args.outcome,
    );
    println!("triggered {}", run.run_id);
    if args.fetch_token {
        handle.set_run(Some(run.run_id.clone()), None)?;
    } else {
        handle.track(&run)?;
    }

    let view = tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        handle.wait_terminal(&run.run_id),
    )
    .await
    .map_err(|_| format!("run {} did not settle in {}s", run.run_id, args.timeout_secs))??;

    println!(
        "final status: {}",
        view.status.map(|s| s.to_string()).unwrap_or_else(|| "none".into())
    );
    handle.shutdown();
    Ok(())
}
