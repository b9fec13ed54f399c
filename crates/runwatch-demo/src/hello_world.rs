use std::time::Duration;

use clap::ValueEnum;
use runwatch_core::{InMemoryRuns, RunStatus, SourceError, TriggerHandle};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CHANNEL: &str = "progress";

/// How the simulated run ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Outcome {
    Complete,
    Fail,
    Crash,
    Cancel,
}

impl Outcome {
    fn status(self) -> RunStatus {
        match self {
            Outcome::Complete => RunStatus::Completed,
            Outcome::Fail => RunStatus::Failed,
            Outcome::Crash => RunStatus::Crashed,
            Outcome::Cancel => RunStatus::Cancelled,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HelloOutput {
    pub message: String,
}

/// Triggers the hello-world task on the in-memory registry and drives it in
/// the background: four progress fragments `interval` apart, then `outcome`.
pub fn trigger(
    runs: &InMemoryRuns,
    name: String,
    interval: Duration,
    outcome: Outcome,
) -> TriggerHandle {
    let handle = runs.create_run();
    let runs = runs.clone();
    let run_id = handle.run_id.clone();
    tokio::spawn(async move {
        if let Err(err) = drive(&runs, &run_id, &name, interval, outcome).await {
            tracing::error!(run_id = %run_id, error = %err, "hello-world task aborted");
        }
    });
    handle
}

async fn drive(
    runs: &InMemoryRuns,
    run_id: &runwatch_core::RunId,
    name: &str,
    interval: Duration,
    outcome: Outcome,
) -> Result<(), SourceError> {
    runs.set_status(run_id, RunStatus::Executing, None)?;
    runs.append(run_id, CHANNEL, format!("Hello, {name}!"))?;
    info!(run_id = %run_id, name, "starting hello world task");

    for step in ["Processing...", "Almost done...", "Complete!"] {
        tokio::time::sleep(interval).await;
        runs.append(run_id, CHANNEL, step)?;
    }

    let output = match outcome {
        Outcome::Complete => {
            let output = HelloOutput {
                message: format!("Hello, {name}! This is a test task."),
            };
            serde_json::to_value(&output).ok()
        }
        _ => None,
    };
    info!(run_id = %run_id, outcome = ?outcome, "hello world task finished");
    runs.set_status(run_id, outcome.status(), output)
}
