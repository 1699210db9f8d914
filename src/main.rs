use snapshot_orchestrator::{init_tracing, OrchestratorConfig, RunOutcome, Runner};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(RunOutcome::Completed) => {
            tracing::info!(target: "orchestrator", "cutover complete");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Interrupted) => {
            tracing::info!(target: "orchestrator", "interrupted; state is preserved for the next run");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(target: "orchestrator", error = %format!("{err:#}"), "orchestrator aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<RunOutcome> {
    let config = OrchestratorConfig::from_env()?;
    let mut runner = Runner::new(config)?;
    runner.run_until_signal().await
}
