use crate::gate::{MainchainView, SidechainView};
use crate::ledger::CompletionLedger;
use crate::pipeline::reset::{reset_reseed, reset_snapshot};
use crate::pipeline::scheduler::{AdaptiveScheduler, PollThresholds};
use crate::pipeline::stages::{build_stages, StageDeps};
use crate::pipeline::{PipelineDriver, RunOutcome};
use crate::process::{
    ContainerRuntime, DockerCli, ExternalToolInvoker, ProcessSupervisor, ToolRunner,
};
use crate::rpc::{MainchainRpcClient, RpcClientOptions, SidechainClient};
use crate::runtime::config::OrchestratorConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// External systems the runner talks to. [`Runner::new`] wires the
/// production implementations; tests substitute their own.
pub struct Collaborators {
    pub mainchain: Arc<dyn MainchainView>,
    pub sidechain: Arc<dyn SidechainView>,
    pub eth_rpc_url: String,
    pub containers: Arc<dyn ContainerRuntime>,
    pub tools: Arc<dyn ToolRunner>,
}

impl Collaborators {
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let options = RpcClientOptions::with_timeout(config.rpc_timeout());
        let mainchain = MainchainRpcClient::new(
            config.mainchain_rpc_url(),
            config.mainchain_rpc_user(),
            config.mainchain_rpc_password(),
            options.clone(),
        )?;
        let sidechain = SidechainClient::new(config.sidechain_url(), options)?;
        let eth_rpc_url = sidechain.eth_rpc_url();

        Ok(Self {
            mainchain: Arc::new(mainchain),
            sidechain: Arc::new(sidechain),
            eth_rpc_url,
            containers: Arc::new(DockerCli::default()),
            tools: Arc::new(ExternalToolInvoker::new()),
        })
    }
}

/// Applies operator resets, then drives the stage graph until completion or
/// shutdown.
pub struct Runner {
    config: OrchestratorConfig,
    ledger: CompletionLedger,
    supervisor: ProcessSupervisor,
    driver: PipelineDriver,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let ledger = CompletionLedger::open(config.layout().state_dir())?;
        let supervisor = ProcessSupervisor::new(collaborators.containers);
        let shutdown = CancellationToken::new();

        let stages = build_stages(
            &config,
            StageDeps {
                ledger: ledger.clone(),
                mainchain: collaborators.mainchain,
                sidechain: collaborators.sidechain,
                eth_rpc_url: collaborators.eth_rpc_url,
                supervisor: supervisor.clone(),
                tools: collaborators.tools,
            },
        );
        let driver = PipelineDriver::new(
            ledger.clone(),
            stages,
            AdaptiveScheduler::new(config.poll_intervals(), PollThresholds::default()),
            Arc::new(Telemetry::default()),
            shutdown.clone(),
        )?;

        Ok(Self {
            config,
            ledger,
            supervisor,
            driver,
            shutdown,
        })
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.driver.telemetry()
    }

    pub async fn run(&mut self) -> Result<RunOutcome> {
        tracing::info!(
            target: "orchestrator",
            network = self.config.network(),
            snapshot_height = self.config.target().snapshot_height(),
            confirmation_depth = self.config.target().confirmation_depth(),
            debug = self.config.debug(),
            "orchestrator starting"
        );

        for flag in self.config.ignored_debug_flags() {
            tracing::warn!(target: "orchestrator", flag, "flag ignored because DEBUG is not enabled");
        }

        if self.config.force_new_snapshot() {
            reset_snapshot(&self.ledger, &self.config.layout())?;
        }
        if self.config.force_reseed() {
            let containers = [
                self.config.mainchain_container(),
                self.config.sidechain_container(),
            ];
            reset_reseed(&self.ledger, &self.supervisor, &containers).await?;
        }

        self.driver.run().await
    }

    /// Runs until completion, a fatal error, or SIGINT/SIGTERM. A signal lets
    /// the in-flight operation finish and skips the next iteration.
    pub async fn run_until_signal(&mut self) -> Result<RunOutcome> {
        let listener = spawn_signal_listener(self.shutdown.clone());
        let outcome = self.run().await;
        listener.abort();
        outcome
    }
}

fn spawn_signal_listener(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_termination() => {
                tracing::info!(target: "orchestrator", "termination signal received; shutting down after the current operation");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = wait_for_ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(target: "orchestrator", error = %err, "failed to install SIGTERM handler");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(target: "orchestrator", error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
