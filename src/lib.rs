pub mod gate;
pub mod ledger;
pub mod pipeline;
pub mod process;
pub mod rpc;
pub mod runtime;

pub use gate::{
    BlockReference, BlockSummary, GateState, MainchainGate, MainchainView, SidechainGate,
    SidechainTrigger, SidechainView, SyncStatus,
};
pub use ledger::{CompletionLedger, LedgerError, MarkerKey};
pub use pipeline::{
    AdaptiveScheduler, PipelineDriver, PollIntervals, PollThresholds, PollTier, RunOutcome, Stage,
    StageError, StageId, StageProgress,
};
pub use process::{
    ContainerRuntime, DockerCli, ExternalToolInvoker, ProcessSupervisor, SupervisorError,
    ToolError, ToolOutput, ToolRunner,
};
pub use rpc::{MainchainRpcClient, RpcClientOptions, RpcError, SidechainClient};
pub use runtime::config::{OrchestratorConfig, OrchestratorConfigBuilder, SnapshotTarget};
pub use runtime::layout::SnapshotLayout;
pub use runtime::runner::{Collaborators, Runner};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
