use crate::ledger::{CompletionLedger, MarkerKey};
use crate::pipeline::error::is_transient;
use crate::pipeline::scheduler::AdaptiveScheduler;
use crate::pipeline::stage::{Stage, StageError, StageId, StageProgress};
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage marker is present.
    Completed,
    /// The shutdown token was cancelled between iterations or during a sleep.
    Interrupted,
}

/// Result of a single pass over the stage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    pub completed: usize,
    pub total: usize,
    /// Smallest distance reported by a waiting stage.
    pub distance: Option<u64>,
}

impl Sweep {
    pub fn all_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Walks the stage DAG until every stage is complete.
pub struct PipelineDriver {
    ledger: CompletionLedger,
    stages: Vec<Arc<dyn Stage>>,
    keys: HashMap<StageId, MarkerKey>,
    scheduler: AdaptiveScheduler,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    announced: HashSet<StageId>,
}

impl PipelineDriver {
    /// Validates the graph and orders it topologically. Stages keep their
    /// declaration order wherever the dependencies allow it.
    pub fn new(
        ledger: CompletionLedger,
        stages: Vec<Arc<dyn Stage>>,
        scheduler: AdaptiveScheduler,
        telemetry: Arc<Telemetry>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let stages = topological_order(stages)?;
        let keys = stages
            .iter()
            .map(|stage| (stage.id(), stage.completion_key()))
            .collect();

        Ok(Self {
            ledger,
            stages,
            keys,
            scheduler,
            telemetry,
            shutdown,
            announced: HashSet::new(),
        })
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id()).collect()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    pub async fn run(&mut self) -> Result<RunOutcome> {
        tracing::info!(target: TARGET, stages = self.stages.len(), "pipeline driver started");
        let outcome = self.run_loop().await;

        let snapshot = self.telemetry.snapshot();
        tracing::info!(
            target: TARGET,
            outcome = ?outcome.as_ref().ok(),
            iterations = snapshot.iterations,
            actions = snapshot.actions,
            transient_failures = snapshot.transient_failures,
            "pipeline driver stopped"
        );
        outcome
    }

    async fn run_loop(&mut self) -> Result<RunOutcome> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }

            let sweep = self.sweep().await?;
            if sweep.all_complete() {
                tracing::info!(target: TARGET, "all stages complete");
                return Ok(RunOutcome::Completed);
            }

            let interval = self.scheduler.next_interval(sweep.distance);
            tracing::debug!(
                target: TARGET,
                completed = sweep.completed,
                total = sweep.total,
                distance = ?sweep.distance,
                sleep_secs = interval.as_secs_f64(),
                "iteration finished"
            );

            select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(target: TARGET, "shutdown requested; stopping after the current iteration");
                    return Ok(RunOutcome::Interrupted);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Runs one pass over the graph in topological order.
    pub async fn sweep(&mut self) -> Result<Sweep> {
        self.telemetry.record_iteration();

        let stages = self.stages.clone();
        let mut sweep = Sweep {
            completed: 0,
            total: stages.len(),
            distance: None,
        };

        for stage in stages {
            let id = stage.id();
            let key = stage.completion_key();

            if self.ledger.is_complete(key)? {
                self.announce(id);
                sweep.completed += 1;
                continue;
            }

            if !self.dependencies_complete(stage.as_ref())? {
                continue;
            }

            self.telemetry.record_action();
            match stage.run().await {
                Ok(StageProgress::Complete { payload }) => {
                    self.ledger
                        .mark_complete(key, payload.as_deref())
                        .map_err(|err| StageError::new(id, err))?;
                    self.announce(id);
                    sweep.completed += 1;
                }
                Ok(StageProgress::Waiting { distance }) => {
                    sweep.distance = closest(sweep.distance, distance);
                }
                Err(err) if is_transient(&err) => {
                    self.telemetry.record_transient_failure();
                    tracing::warn!(
                        target: TARGET,
                        stage = id,
                        error = %format!("{err:#}"),
                        "transient failure; retrying next iteration"
                    );
                }
                Err(err) => {
                    tracing::error!(target: TARGET, stage = id, error = %format!("{err:#}"), "stage failed");
                    return Err(StageError::new(id, err).into());
                }
            }
        }

        Ok(sweep)
    }

    fn dependencies_complete(&self, stage: &dyn Stage) -> Result<bool> {
        for dependency in stage.dependencies() {
            let Some(key) = self.keys.get(dependency) else {
                bail!("stage {} depends on unknown stage {dependency}", stage.id());
            };
            if !self.ledger.is_complete(*key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn announce(&mut self, id: StageId) {
        if self.announced.insert(id) {
            tracing::info!(target: TARGET, stage = id, "stage complete");
        }
    }
}

fn closest(current: Option<u64>, reported: Option<u64>) -> Option<u64> {
    match (current, reported) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn topological_order(stages: Vec<Arc<dyn Stage>>) -> Result<Vec<Arc<dyn Stage>>> {
    let mut index = HashMap::new();
    for (position, stage) in stages.iter().enumerate() {
        if index.insert(stage.id(), position).is_some() {
            bail!("stage {} is declared twice", stage.id());
        }
    }

    for stage in &stages {
        for dependency in stage.dependencies() {
            if !index.contains_key(dependency) {
                bail!("stage {} depends on unknown stage {dependency}", stage.id());
            }
        }
    }

    let mut ordered: Vec<Arc<dyn Stage>> = Vec::with_capacity(stages.len());
    let mut placed: HashSet<StageId> = HashSet::new();
    let mut pending = stages;

    while !pending.is_empty() {
        let ready = pending.iter().position(|stage| {
            stage
                .dependencies()
                .iter()
                .all(|dependency| placed.contains(dependency))
        });

        let Some(position) = ready else {
            let remaining: Vec<_> = pending.iter().map(|stage| stage.id()).collect();
            bail!("stage graph has a cycle among {}", remaining.join(", "));
        };

        let stage = pending.remove(position);
        placed.insert(stage.id());
        ordered.push(stage);
    }

    Ok(ordered)
}
