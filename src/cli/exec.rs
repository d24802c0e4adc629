//! `agentbox exec`: one command as a registered, stoppable task

use agentbox_core::{GenerationOutcome, TaskManager};
use agentbox_sandbox::SandboxBackend;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Exit code reported when the run was aborted by Ctrl-C
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// `--thread` when given, otherwise the owner the backend was built for
fn thread_id_for(thread: Option<String>, owner: &str) -> String {
    thread.unwrap_or_else(|| owner.to_string())
}

pub async fn run(
    backend: &Arc<dyn SandboxBackend>,
    owner: &str,
    command: &str,
    thread: Option<String>,
    grace: Duration,
    json: bool,
) -> anyhow::Result<i32> {
    let tasks = TaskManager::new();
    let thread_id = thread_id_for(thread, owner);

    let runner = {
        let backend = Arc::clone(backend);
        let command = command.to_string();
        tasks.run_generation(thread_id.clone(), move |_stop| async move {
            backend.execute(&command).await
        })
    };
    tokio::pin!(runner);

    let outcome = tokio::select! {
        outcome = &mut runner => outcome,
        _ = tokio::signal::ctrl_c() => {
            // The runner keeps being polled so a command that finishes inside
            // the grace period releases its registration.
            let (stopped, outcome) = tokio::join!(tasks.stop(&thread_id, grace), &mut runner);
            info!(thread_id = %thread_id, outcome = ?stopped, "Interrupted");
            outcome
        }
    };

    match outcome {
        GenerationOutcome::Completed(response) | GenerationOutcome::Stopped(response) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", response.output);
                if !response.output.ends_with('\n') {
                    println!();
                }
                if response.truncated {
                    eprintln!("[output truncated]");
                }
            }
            Ok(response.exit_code)
        }
        GenerationOutcome::Cancelled => {
            eprintln!("Command cancelled");
            Ok(INTERRUPTED_EXIT_CODE)
        }
        GenerationOutcome::Failed(error) => {
            warn!(thread_id = %thread_id, error = %error, "Command task failed");
            anyhow::bail!("command task failed: {}", error)
        }
    }
}
