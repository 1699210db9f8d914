//! Concrete stages of the cutover and the graph that connects them.

use crate::gate::{
    MainchainGate, MainchainGateSettings, MainchainView, SidechainGate, SidechainGateSettings,
    SidechainView,
};
use crate::ledger::atomic::write_atomically;
use crate::ledger::keys::{
    CHECK_MAINCHAIN_ADDRESSES_COMPLETE, CHECK_MAINCHAIN_TOTAL_COMPLETE,
    CHECK_SIDECHAIN_ADDRESSES_COMPLETE, MAINCHAIN_MIGRATION_HASH_COMPLETE,
    MAINCHAIN_SIDECHAIN_BALANCE, MAINCHAIN_SNAPSHOT_COMPLETE, MAINCHAIN_TRANSFORM_COMPLETE,
    SIDECHAIN_MIGRATION_HASH_COMPLETE, SIDECHAIN_RESEED_COMPLETE, SIDECHAIN_SNAPSHOT_COMPLETE,
    SIDECHAIN_STAKES_COMPLETE, SIDECHAIN_TRANSFORM_COMPLETE,
};
use crate::ledger::{CompletionLedger, MarkerKey};
use crate::pipeline::error::is_transient;
use crate::pipeline::stage::{Stage, StageFuture, StageId, StageProgress};
use crate::process::{ProcessSupervisor, ToolError, ToolRunner};
use crate::runtime::config::OrchestratorConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

pub const MAINCHAIN_SNAPSHOT: StageId = "mainchain-snapshot";
pub const SIDECHAIN_SNAPSHOT: StageId = "sidechain-snapshot";
pub const SIDECHAIN_STAKES: StageId = "sidechain-stakes";
pub const MAINCHAIN_TRANSFORM: StageId = "mainchain-transform";
pub const SIDECHAIN_TRANSFORM: StageId = "sidechain-transform";
pub const CHECK_SIDECHAIN_ADDRESSES: StageId = "check-sidechain-addresses";
pub const CHECK_MAINCHAIN_ADDRESSES: StageId = "check-mainchain-addresses";
pub const CHECK_MAINCHAIN_TOTAL: StageId = "check-mainchain-total";
pub const MAINCHAIN_MIGRATION_HASH: StageId = "mainchain-migration-hash";
pub const SIDECHAIN_MIGRATION_HASH: StageId = "sidechain-migration-hash";

const TOOL_TARGET: &str = "orchestrator::tools";
const MIGRATION_HASH_TOOL: &str = "migrationhash";

/// Collaborators shared by the stages.
#[derive(Clone)]
pub struct StageDeps {
    pub ledger: CompletionLedger,
    pub mainchain: Arc<dyn MainchainView>,
    pub sidechain: Arc<dyn SidechainView>,
    /// Sidechain Ethereum RPC endpoint handed to the stakes exporter.
    pub eth_rpc_url: String,
    pub supervisor: ProcessSupervisor,
    pub tools: Arc<dyn ToolRunner>,
}

/// Builds every stage of the cutover in declaration order.
pub fn build_stages(config: &OrchestratorConfig, deps: StageDeps) -> Vec<Arc<dyn Stage>> {
    let layout = config.layout();
    let target = config.target();
    let debug = config.debug();

    let mainchain_gate = MainchainGate::new(
        Arc::clone(&deps.mainchain),
        deps.supervisor.clone(),
        deps.ledger.clone(),
        MainchainGateSettings {
            container: config.mainchain_container(),
            target,
            sidechain_ids: config.balance_sidechain_ids(),
            artifact: layout.mainchain_snapshot(),
            debug,
        },
    );
    let sidechain_gate = SidechainGate::new(
        Arc::clone(&deps.sidechain),
        deps.supervisor.clone(),
        deps.ledger.clone(),
        SidechainGateSettings {
            container: config.sidechain_container(),
            target,
            artifact: layout.sidechain_snapshot(),
        },
    );

    let transforms = vec![MAINCHAIN_TRANSFORM, SIDECHAIN_TRANSFORM];
    let mut checks = vec![CHECK_SIDECHAIN_ADDRESSES, CHECK_MAINCHAIN_ADDRESSES];

    let mut stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(MainchainSnapshotStage {
            gate: mainchain_gate,
        }),
        Arc::new(SidechainSnapshotStage {
            gate: sidechain_gate,
            dependencies: vec![MAINCHAIN_SNAPSHOT],
        }),
        Arc::new(SidechainStakesStage {
            ledger: deps.ledger.clone(),
            sidechain: Arc::clone(&deps.sidechain),
            tools: Arc::clone(&deps.tools),
            supervisor: deps.supervisor.clone(),
            container: config.sidechain_container(),
            eth_rpc_url: deps.eth_rpc_url.clone(),
            stakes: layout.sidechain_stakes(),
            debug,
            dependencies: vec![SIDECHAIN_SNAPSHOT],
        }),
        Arc::new(ToolStage {
            id: MAINCHAIN_TRANSFORM,
            key: MAINCHAIN_TRANSFORM_COMPLETE,
            dependencies: vec![SIDECHAIN_STAKES],
            tool: "zend_to_horizen",
            args: vec![
                ToolArg::Path(layout.mainchain_snapshot()),
                ToolArg::Path(layout.automappings()),
                ToolArg::Path(layout.mainchain_vault()),
                ToolArg::Path(layout.sidechain_vault()),
            ],
            outputs: vec![layout.mainchain_vault(), layout.sidechain_vault()],
            ledger: deps.ledger.clone(),
            tools: Arc::clone(&deps.tools),
        }),
        Arc::new(ToolStage {
            id: SIDECHAIN_TRANSFORM,
            key: SIDECHAIN_TRANSFORM_COMPLETE,
            dependencies: vec![SIDECHAIN_STAKES, MAINCHAIN_TRANSFORM],
            tool: "setup_eon2_json",
            args: vec![
                ToolArg::Path(layout.sidechain_snapshot()),
                ToolArg::Path(layout.sidechain_stakes()),
                ToolArg::Path(layout.sidechain_vault()),
                ToolArg::Path(layout.sidechain_accounts()),
            ],
            outputs: vec![layout.sidechain_accounts()],
            ledger: deps.ledger.clone(),
            tools: Arc::clone(&deps.tools),
        }),
        Arc::new(ToolStage {
            id: CHECK_SIDECHAIN_ADDRESSES,
            key: CHECK_SIDECHAIN_ADDRESSES_COMPLETE,
            dependencies: transforms.clone(),
            tool: "check_addresses_balance_from_eon",
            args: vec![
                ToolArg::Path(layout.sidechain_snapshot()),
                ToolArg::Path(layout.sidechain_stakes()),
                ToolArg::Path(layout.sidechain_vault()),
                ToolArg::Path(layout.sidechain_accounts()),
            ],
            outputs: Vec::new(),
            ledger: deps.ledger.clone(),
            tools: Arc::clone(&deps.tools),
        }),
        Arc::new(ToolStage {
            id: CHECK_MAINCHAIN_ADDRESSES,
            key: CHECK_MAINCHAIN_ADDRESSES_COMPLETE,
            dependencies: transforms.clone(),
            tool: "check_addresses_balance_from_zend",
            args: vec![
                ToolArg::Path(layout.mainchain_snapshot()),
                ToolArg::Path(layout.automappings()),
                ToolArg::Path(layout.mainchain_vault()),
                ToolArg::Path(layout.sidechain_vault()),
            ],
            outputs: Vec::new(),
            ledger: deps.ledger.clone(),
            tools: Arc::clone(&deps.tools),
        }),
    ];

    if config.skip_total_balance_check() {
        tracing::warn!(target: TOOL_TARGET, "skipping check_total_balance_from_zend");
    } else {
        checks.push(CHECK_MAINCHAIN_TOTAL);
        stages.push(Arc::new(ToolStage {
            id: CHECK_MAINCHAIN_TOTAL,
            key: CHECK_MAINCHAIN_TOTAL_COMPLETE,
            dependencies: transforms,
            tool: "check_total_balance_from_zend",
            args: vec![
                ToolArg::Literal(target.snapshot_height().to_string()),
                ToolArg::Path(layout.mainchain_snapshot()),
                ToolArg::Payload(MAINCHAIN_SIDECHAIN_BALANCE),
                ToolArg::Literal(config.network().to_owned()),
            ],
            outputs: Vec::new(),
            ledger: deps.ledger.clone(),
            tools: Arc::clone(&deps.tools),
        }));
    }

    stages.push(Arc::new(MigrationHashStage {
        id: MAINCHAIN_MIGRATION_HASH,
        key: MAINCHAIN_MIGRATION_HASH_COMPLETE,
        dependencies: checks.clone(),
        source: layout.mainchain_vault(),
        label: "zend",
        destination: layout.mainchain_migration_hash(),
        tools: Arc::clone(&deps.tools),
    }));
    stages.push(Arc::new(MigrationHashStage {
        id: SIDECHAIN_MIGRATION_HASH,
        key: SIDECHAIN_MIGRATION_HASH_COMPLETE,
        dependencies: checks,
        source: layout.sidechain_accounts(),
        label: "eon",
        destination: layout.sidechain_migration_hash(),
        tools: Arc::clone(&deps.tools),
    }));

    stages
}

pub struct MainchainSnapshotStage {
    gate: MainchainGate,
}

impl Stage for MainchainSnapshotStage {
    fn id(&self) -> StageId {
        MAINCHAIN_SNAPSHOT
    }

    fn dependencies(&self) -> &[StageId] {
        &[]
    }

    fn completion_key(&self) -> MarkerKey {
        MAINCHAIN_SNAPSHOT_COMPLETE
    }

    fn run(&self) -> StageFuture<'_> {
        Box::pin(self.gate.poll())
    }
}

pub struct SidechainSnapshotStage {
    gate: SidechainGate,
    dependencies: Vec<StageId>,
}

impl Stage for SidechainSnapshotStage {
    fn id(&self) -> StageId {
        SIDECHAIN_SNAPSHOT
    }

    fn dependencies(&self) -> &[StageId] {
        &self.dependencies
    }

    fn completion_key(&self) -> MarkerKey {
        SIDECHAIN_SNAPSHOT_COMPLETE
    }

    fn run(&self) -> StageFuture<'_> {
        Box::pin(self.gate.poll())
    }
}

/// Exports forger stakes at the sidechain snapshot height, then stops the
/// sidechain node. The exporter reads the node's Ethereum RPC, so the node
/// must be running, reseeded and answering before the tool is invoked.
pub struct SidechainStakesStage {
    ledger: CompletionLedger,
    sidechain: Arc<dyn SidechainView>,
    tools: Arc<dyn ToolRunner>,
    supervisor: ProcessSupervisor,
    container: String,
    eth_rpc_url: String,
    stakes: PathBuf,
    debug: bool,
    dependencies: Vec<StageId>,
}

impl SidechainStakesStage {
    async fn export(&self) -> Result<StageProgress> {
        let height = self
            .ledger
            .read_payload(SIDECHAIN_SNAPSHOT_COMPLETE)?
            .context("sidechain snapshot marker carries no height")?;

        let container = self.container.as_str();
        self.supervisor.ensure_running(container).await?;

        if !self.ledger.is_complete(SIDECHAIN_RESEED_COMPLETE)? {
            tracing::info!(target: TOOL_TARGET, container, "waiting for the node to complete reseeding");
            return Ok(StageProgress::waiting());
        }

        if let Err(err) = self.sidechain.block_number().await {
            if is_transient(&err) {
                tracing::info!(target: TOOL_TARGET, container, error = %err, "waiting for RPC to be ready");
                return Ok(StageProgress::waiting());
            }
            return Err(err);
        }

        let tool = "get_all_forger_stakes";
        let args = vec![
            height,
            self.eth_rpc_url.clone(),
            self.stakes.display().to_string(),
        ];
        self.tools.run(tool, &args).await?;
        ensure_outputs(tool, std::slice::from_ref(&self.stakes))?;

        if !self.debug {
            self.supervisor.ensure_stopped(&self.container).await?;
        }
        Ok(StageProgress::complete())
    }
}

impl Stage for SidechainStakesStage {
    fn id(&self) -> StageId {
        SIDECHAIN_STAKES
    }

    fn dependencies(&self) -> &[StageId] {
        &self.dependencies
    }

    fn completion_key(&self) -> MarkerKey {
        SIDECHAIN_STAKES_COMPLETE
    }

    fn run(&self) -> StageFuture<'_> {
        Box::pin(self.export())
    }
}

/// One argument of an external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArg {
    Literal(String),
    Path(PathBuf),
    /// Payload of a ledger marker, read when the stage runs.
    Payload(MarkerKey),
}

/// Runs an external tool once and requires its declared outputs to exist.
pub struct ToolStage {
    pub id: StageId,
    pub key: MarkerKey,
    pub dependencies: Vec<StageId>,
    pub tool: &'static str,
    pub args: Vec<ToolArg>,
    pub outputs: Vec<PathBuf>,
    pub ledger: CompletionLedger,
    pub tools: Arc<dyn ToolRunner>,
}

impl ToolStage {
    fn resolve_args(&self) -> Result<Vec<String>> {
        self.args
            .iter()
            .map(|arg| match arg {
                ToolArg::Literal(value) => Ok(value.clone()),
                ToolArg::Path(path) => Ok(path.display().to_string()),
                ToolArg::Payload(key) => self
                    .ledger
                    .read_payload(*key)?
                    .with_context(|| format!("marker {key} has no payload for {}", self.tool)),
            })
            .collect()
    }

    async fn execute(&self) -> Result<StageProgress> {
        let args = self.resolve_args()?;
        self.tools.run(self.tool, &args).await?;
        ensure_outputs(self.tool, &self.outputs)?;
        Ok(StageProgress::complete())
    }
}

impl Stage for ToolStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn dependencies(&self) -> &[StageId] {
        &self.dependencies
    }

    fn completion_key(&self) -> MarkerKey {
        self.key
    }

    fn run(&self) -> StageFuture<'_> {
        Box::pin(self.execute())
    }
}

/// Computes the cumulative migration hash of a transformed file and stores it
/// next to that file.
pub struct MigrationHashStage {
    pub id: StageId,
    pub key: MarkerKey,
    pub dependencies: Vec<StageId>,
    pub source: PathBuf,
    pub label: &'static str,
    pub destination: PathBuf,
    pub tools: Arc<dyn ToolRunner>,
}

impl MigrationHashStage {
    async fn compute(&self) -> Result<StageProgress> {
        let args = vec![self.source.display().to_string(), self.label.to_owned()];
        let output = self.tools.run(MIGRATION_HASH_TOOL, &args).await?;

        let hash = output.stdout.trim();
        if hash.is_empty() {
            return Err(ToolError::EmptyOutput {
                tool: MIGRATION_HASH_TOOL.to_owned(),
            }
            .into());
        }

        write_atomically(&self.destination, hash.as_bytes())?;
        tracing::info!(
            target: TOOL_TARGET,
            source = %self.source.display(),
            hash,
            "migration hash computed"
        );
        Ok(StageProgress::complete_with(hash))
    }
}

impl Stage for MigrationHashStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn dependencies(&self) -> &[StageId] {
        &self.dependencies
    }

    fn completion_key(&self) -> MarkerKey {
        self.key
    }

    fn run(&self) -> StageFuture<'_> {
        Box::pin(self.compute())
    }
}

fn ensure_outputs(tool: &str, outputs: &[PathBuf]) -> Result<()> {
    match outputs.iter().find(|path| !path.is_file()) {
        Some(path) => Err(ToolError::MissingOutput {
            tool: tool.to_owned(),
            path: path.clone(),
        }
        .into()),
        None => Ok(()),
    }
}
