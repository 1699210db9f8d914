use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bitcoin::{Amount, BlockHash};
use futures::future::BoxFuture;
use snapshot_orchestrator::process::ContainerInfo;
use snapshot_orchestrator::{
    BlockReference, BlockSummary, ContainerRuntime, MainchainView, RpcError, SidechainView,
    SyncStatus, ToolError, ToolOutput, ToolRunner,
};

/// Deterministic block hash for `height` on the fork identified by `fork`.
pub fn block_hash(height: u64, fork: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = fork;
    bytes[24..].copy_from_slice(&height.to_be_bytes());
    BlockHash::from_str(&hex::encode(bytes)).expect("32 byte hex is a valid block hash")
}

struct MainchainState {
    height: u64,
    progress: f64,
    fork: u8,
    reachable: bool,
    balances: HashMap<String, Amount>,
}

/// Scripted mainchain daemon.
pub struct FakeMainchain {
    state: Mutex<MainchainState>,
    calls: Mutex<Vec<String>>,
}

impl FakeMainchain {
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(MainchainState {
                height,
                progress: 1.0,
                fork: 0,
                reachable: true,
                balances: HashMap::new(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn set_progress(&self, progress: f64) {
        self.state.lock().unwrap().progress = progress;
    }

    /// Replaces every block hash with one from a different fork.
    pub fn reorg(&self, fork: u8) {
        self.state.lock().unwrap().fork = fork;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    pub fn set_balance(&self, sidechain_id: &str, balance: Amount) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(sidechain_id.to_owned(), balance);
    }

    pub fn hash_at(&self, height: u64) -> BlockHash {
        block_hash(height, self.state.lock().unwrap().fork)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(method.to_owned());
        if self.state.lock().unwrap().reachable {
            Ok(())
        } else {
            Err(RpcError::unavailable(method, "connection refused").into())
        }
    }
}

impl MainchainView for FakeMainchain {
    fn sync_status(&self) -> BoxFuture<'_, Result<SyncStatus>> {
        Box::pin(async move {
            self.record("getblockchaininfo")?;
            let state = self.state.lock().unwrap();
            Ok(SyncStatus {
                height: state.height,
                verification_progress: state.progress,
            })
        })
    }

    fn block_hash(&self, height: u64) -> BoxFuture<'_, Result<BlockHash>> {
        Box::pin(async move {
            self.record("getblockhash")?;
            Ok(self.hash_at(height))
        })
    }

    fn block_at(&self, height: u64) -> BoxFuture<'_, Result<BlockSummary>> {
        Box::pin(async move {
            self.record("getblock")?;
            let tip = self.state.lock().unwrap().height;
            Ok(BlockSummary {
                hash: self.hash_at(height),
                height,
                confirmations: tip as i64 - height as i64 + 1,
            })
        })
    }

    fn sidechain_balance<'a>(&'a self, sidechain_id: &'a str) -> BoxFuture<'a, Result<Amount>> {
        Box::pin(async move {
            self.record("getscinfo")?;
            self.state
                .lock()
                .unwrap()
                .balances
                .get(sidechain_id)
                .copied()
                .ok_or_else(|| RpcError::invalid("getscinfo", "unknown sidechain").into())
        })
    }
}

struct SidechainState {
    ready: bool,
    reference_height: u64,
    best_height: u64,
    mainchain_fork: u8,
    write_dumps: bool,
}

/// Scripted sidechain node. The sidechain block referencing mainchain height
/// `h` is `sc-<h>` at sidechain height `h + 500`.
pub struct FakeSidechain {
    state: Mutex<SidechainState>,
    dumps: Mutex<Vec<(String, PathBuf)>>,
}

pub const SIDECHAIN_HEIGHT_OFFSET: u64 = 500;

impl FakeSidechain {
    pub fn new(reference_height: u64) -> Self {
        Self {
            state: Mutex::new(SidechainState {
                ready: true,
                reference_height,
                best_height: reference_height + SIDECHAIN_HEIGHT_OFFSET,
                mainchain_fork: 0,
                write_dumps: true,
            }),
            dumps: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reference_height(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        state.reference_height = height;
        state.best_height = height + SIDECHAIN_HEIGHT_OFFSET;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    pub fn set_mainchain_fork(&self, fork: u8) {
        self.state.lock().unwrap().mainchain_fork = fork;
    }

    pub fn set_write_dumps(&self, write: bool) {
        self.state.lock().unwrap().write_dumps = write;
    }

    pub fn dumps(&self) -> Vec<(String, PathBuf)> {
        self.dumps.lock().unwrap().clone()
    }

    pub fn block_id_for(height: u64) -> String {
        format!("sc-{height}")
    }
}

impl SidechainView for FakeSidechain {
    fn block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if state.ready {
                Ok(state.best_height)
            } else {
                Err(RpcError::unavailable("eth_blockNumber", "connection refused").into())
            }
        })
    }

    fn best_reference_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().reference_height) })
    }

    fn reference_at(&self, mainchain_height: u64) -> BoxFuture<'_, Result<BlockReference>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if mainchain_height > state.reference_height {
                return Err(RpcError::Rejected {
                    method: "/mainchain/blockReferenceInfoBy".into(),
                    code: 204,
                    message: "reference not found".into(),
                }
                .into());
            }
            Ok(BlockReference {
                mainchain_hash: block_hash(mainchain_height, state.mainchain_fork).to_string(),
                sidechain_block_id: Self::block_id_for(mainchain_height),
            })
        })
    }

    fn block_height_by_id<'a>(&'a self, block_id: &'a str) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let height: u64 = block_id
                .strip_prefix("sc-")
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| anyhow!("unknown block {block_id}"))?;
            Ok(height + SIDECHAIN_HEIGHT_OFFSET)
        })
    }

    fn best_block_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().best_height) })
    }

    fn dump<'a>(&'a self, block_id: &'a str, destination: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.dumps
                .lock()
                .unwrap()
                .push((block_id.to_owned(), destination.to_path_buf()));
            if self.state.lock().unwrap().write_dumps {
                fs::write(destination, format!("{{\"block\":\"{block_id}\"}}"))?;
            }
            Ok(())
        })
    }
}

struct ContainerState {
    running: bool,
    stop_timeout: Option<Duration>,
    ignores_stop: bool,
}

/// In-memory container runtime that records every start and stop.
#[derive(Default)]
pub struct FakeContainers {
    containers: Mutex<HashMap<String, ContainerState>>,
    events: Mutex<Vec<String>>,
}

impl FakeContainers {
    pub fn with_running(names: &[&str]) -> Self {
        let fake = Self::default();
        for name in names {
            fake.add(name, true);
        }
        fake
    }

    pub fn add(&self, name: &str, running: bool) {
        self.containers.lock().unwrap().insert(
            name.to_owned(),
            ContainerState {
                running,
                stop_timeout: None,
                ignores_stop: false,
            },
        );
    }

    /// Makes `name` declare `timeout` and ignore every stop request.
    pub fn make_stubborn(&self, name: &str, timeout: Duration) {
        if let Some(state) = self.containers.lock().unwrap().get_mut(name) {
            state.stop_timeout = Some(timeout);
            state.ignores_stop = true;
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.containers
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|state| state.running)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ContainerRuntime for FakeContainers {
    fn inspect<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ContainerInfo>>> {
        Box::pin(async move {
            Ok(self
                .containers
                .lock()
                .unwrap()
                .get(name)
                .map(|state| ContainerInfo {
                    running: state.running,
                    stop_timeout: state.stop_timeout,
                }))
        })
    }

    fn start<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.events.lock().unwrap().push(format!("start {name}"));
            match self.containers.lock().unwrap().get_mut(name) {
                Some(state) => {
                    state.running = true;
                    Ok(())
                }
                None => Err(anyhow!("no such container {name}")),
            }
        })
    }

    fn stop<'a>(&'a self, name: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.events.lock().unwrap().push(format!("stop {name}"));
            match self.containers.lock().unwrap().get_mut(name) {
                Some(state) => {
                    if !state.ignores_stop {
                        state.running = false;
                    }
                    Ok(())
                }
                None => Err(anyhow!("no such container {name}")),
            }
        })
    }
}

/// Tool runner that records invocations. Tools create their declared output
/// files unless configured to fail.
#[derive(Default)]
pub struct FakeTools {
    creates: Mutex<HashMap<String, Vec<PathBuf>>>,
    stdout: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeTools {
    pub fn creates(&self, tool: &str, outputs: Vec<PathBuf>) {
        self.creates
            .lock()
            .unwrap()
            .insert(tool.to_owned(), outputs);
    }

    pub fn prints(&self, tool: &str, stdout: &str) {
        self.stdout
            .lock()
            .unwrap()
            .insert(tool.to_owned(), stdout.to_owned());
    }

    pub fn fails(&self, tool: &str) {
        self.failing.lock().unwrap().insert(tool.to_owned());
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tools_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|(tool, _)| tool).collect()
    }
}

impl ToolRunner for FakeTools {
    fn run<'a>(&'a self, tool: &'a str, args: &'a [String]) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_owned(), args.to_vec()));

            if self.failing.lock().unwrap().contains(tool) {
                return Err(ToolError::Failed {
                    tool: tool.to_owned(),
                    status: "exit status: 1".into(),
                    output: "balance mismatch".into(),
                }
                .into());
            }

            let outputs = self
                .creates
                .lock()
                .unwrap()
                .get(tool)
                .cloned()
                .unwrap_or_default();
            for path in outputs {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, b"{}")?;
            }

            Ok(ToolOutput {
                stdout: self
                    .stdout
                    .lock()
                    .unwrap()
                    .get(tool)
                    .cloned()
                    .unwrap_or_default(),
                stderr: String::new(),
            })
        })
    }
}
