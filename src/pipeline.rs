//! The stage graph and the loop that drives it to completion.

pub mod driver;
pub mod error;
pub mod reset;
pub mod scheduler;
pub mod stage;
pub mod stages;

pub use driver::{PipelineDriver, RunOutcome, Sweep};
pub use error::is_transient;
pub use scheduler::{AdaptiveScheduler, PollIntervals, PollThresholds, PollTier};
pub use stage::{Stage, StageError, StageFuture, StageId, StageProgress};
pub use stages::{build_stages, StageDeps, ToolArg};
