//! Maps "blocks remaining until the next actionable height" onto a polling
//! interval. Recomputed from scratch every iteration.
//!
//! The same thresholds apply before capture and while awaiting confirmation.
//! With the defaults, 3 to 7 blocks short of the confirmation height polls
//! every 10 s and the last 2 blocks poll every second.

use std::fmt;
use std::time::Duration;

pub const DEFAULT_FAR_INTERVAL: Duration = Duration::from_secs(150);
pub const DEFAULT_NEAR_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_IMMINENT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_NEAR_WITHIN: u64 = 7;
pub const DEFAULT_IMMINENT_WITHIN: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTier {
    Far,
    Near,
    Imminent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollThresholds {
    pub near_within: u64,
    pub imminent_within: u64,
}

impl Default for PollThresholds {
    fn default() -> Self {
        Self {
            near_within: DEFAULT_NEAR_WITHIN,
            imminent_within: DEFAULT_IMMINENT_WITHIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub far: Duration,
    pub near: Duration,
    pub imminent: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            far: DEFAULT_FAR_INTERVAL,
            near: DEFAULT_NEAR_INTERVAL,
            imminent: DEFAULT_IMMINENT_INTERVAL,
        }
    }
}

impl PollTier {
    /// `None` means no stage reported a chain distance this iteration.
    pub fn for_distance(distance: Option<u64>, thresholds: &PollThresholds) -> Self {
        match distance {
            None => PollTier::Near,
            Some(blocks) if blocks <= thresholds.imminent_within => PollTier::Imminent,
            Some(blocks) if blocks <= thresholds.near_within => PollTier::Near,
            Some(_) => PollTier::Far,
        }
    }

    pub fn interval(self, intervals: &PollIntervals) -> Duration {
        match self {
            PollTier::Far => intervals.far,
            PollTier::Near => intervals.near,
            PollTier::Imminent => intervals.imminent,
        }
    }
}

impl fmt::Display for PollTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PollTier::Far => "far",
            PollTier::Near => "near",
            PollTier::Imminent => "imminent",
        };
        f.write_str(label)
    }
}

/// Tracks the active tier so that only changes are logged.
#[derive(Debug)]
pub struct AdaptiveScheduler {
    intervals: PollIntervals,
    thresholds: PollThresholds,
    current: Option<PollTier>,
}

impl AdaptiveScheduler {
    pub fn new(intervals: PollIntervals, thresholds: PollThresholds) -> Self {
        Self {
            intervals,
            thresholds,
            current: None,
        }
    }

    pub fn current(&self) -> Option<PollTier> {
        self.current
    }

    pub fn next_interval(&mut self, distance: Option<u64>) -> Duration {
        let tier = PollTier::for_distance(distance, &self.thresholds);
        let interval = tier.interval(&self.intervals);

        if self.current != Some(tier) {
            tracing::info!(
                target: "orchestrator::scheduler",
                tier = %tier,
                distance = ?distance,
                interval_secs = interval.as_secs_f64(),
                "poll interval changed"
            );
            self.current = Some(tier);
        }

        interval
    }
}
