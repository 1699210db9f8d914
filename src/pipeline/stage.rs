use crate::ledger::MarkerKey;
use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use std::fmt;

pub type StageId = &'static str;
pub type StageFuture<'a> = BoxFuture<'a, anyhow::Result<StageProgress>>;

/// Outcome of one invocation of a stage action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageProgress {
    /// The stage finished; the driver records its marker with `payload`.
    Complete { payload: Option<String> },
    /// Preconditions are not met yet. `distance` is the number of blocks
    /// until the next actionable height, when the stage knows it.
    Waiting { distance: Option<u64> },
}

impl StageProgress {
    pub fn complete() -> Self {
        StageProgress::Complete { payload: None }
    }

    pub fn complete_with(payload: impl Into<String>) -> Self {
        StageProgress::Complete {
            payload: Some(payload.into()),
        }
    }

    pub fn waiting() -> Self {
        StageProgress::Waiting { distance: None }
    }

    pub fn waiting_for(distance: u64) -> Self {
        StageProgress::Waiting {
            distance: Some(distance),
        }
    }
}

/// One unit of pipeline work.
///
/// `run` is only invoked while the stage's own marker is absent and every
/// dependency's marker is present. It must be safe to invoke again after a
/// crash at any point.
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    fn dependencies(&self) -> &[StageId];

    fn completion_key(&self) -> MarkerKey;

    fn run(&self) -> StageFuture<'_>;
}

/// A stage action failed with a condition that will not resolve by waiting.
#[derive(Debug)]
pub struct StageError {
    stage: StageId,
    source: AnyError,
}

impl StageError {
    pub fn new(stage: StageId, source: AnyError) -> Self {
        Self { stage, source }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} failed: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}
