//! Lifecycle control for the long-running chain containers.
//!
//! Containers are created by the deployment, never by the orchestrator: a
//! container that cannot be found is a fatal [`SupervisorError::NotFound`].

use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(60);
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    NotFound,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::NotFound => "not found",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub running: bool,
    /// Stop timeout declared in the container configuration, if any.
    pub stop_timeout: Option<Duration>,
}

/// Minimal container control surface.
pub trait ContainerRuntime: Send + Sync {
    /// Returns `None` when no container with that name exists.
    fn inspect<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ContainerInfo>>>;

    fn start<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn stop<'a>(&'a self, name: &'a str, timeout: Duration) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug)]
pub enum SupervisorError {
    NotFound { name: String },
    StopTimeout { name: String, grace: Duration },
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::NotFound { name } => write!(
                f,
                "container '{name}' not found; create it (docker compose create) before starting the orchestrator"
            ),
            SupervisorError::StopTimeout { name, grace } => write!(
                f,
                "container '{name}' did not stop within {}s",
                grace.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for SupervisorError {}

#[derive(Clone)]
pub struct ProcessSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    default_grace: Duration,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            default_grace: DEFAULT_STOP_GRACE,
            poll_interval: STOP_POLL_INTERVAL,
        }
    }

    pub async fn status(&self, name: &str) -> Result<ContainerStatus> {
        Ok(match self.runtime.inspect(name).await? {
            Some(info) if info.running => ContainerStatus::Running,
            Some(_) => ContainerStatus::Stopped,
            None => ContainerStatus::NotFound,
        })
    }

    pub async fn ensure_running(&self, name: &str) -> Result<()> {
        let info = self.inspect_existing(name).await?;
        if info.running {
            tracing::debug!(target: "orchestrator::supervisor", container = name, "already running");
            return Ok(());
        }

        tracing::info!(target: "orchestrator::supervisor", container = name, "starting container");
        self.runtime.start(name).await
    }

    /// Stops `name` and waits until it reports stopped. The wait is bounded by
    /// the container's declared stop timeout, or [`DEFAULT_STOP_GRACE`].
    pub async fn ensure_stopped(&self, name: &str) -> Result<()> {
        let info = self.inspect_existing(name).await?;
        if !info.running {
            tracing::debug!(target: "orchestrator::supervisor", container = name, "already stopped");
            return Ok(());
        }

        let grace = info.stop_timeout.unwrap_or(self.default_grace);
        let deadline = Instant::now() + grace;
        tracing::info!(
            target: "orchestrator::supervisor",
            container = name,
            grace_secs = grace.as_secs(),
            "stopping container"
        );
        self.runtime.stop(name, grace).await?;

        loop {
            match self.status(name).await? {
                ContainerStatus::Stopped => {
                    tracing::info!(target: "orchestrator::supervisor", container = name, "container stopped");
                    return Ok(());
                }
                ContainerStatus::NotFound => {
                    return Err(SupervisorError::NotFound {
                        name: name.to_owned(),
                    }
                    .into())
                }
                ContainerStatus::Running => {}
            }

            if Instant::now() >= deadline {
                tracing::error!(
                    target: "orchestrator::supervisor",
                    container = name,
                    grace_secs = grace.as_secs(),
                    "container did not stop in time"
                );
                return Err(SupervisorError::StopTimeout {
                    name: name.to_owned(),
                    grace,
                }
                .into());
            }
            sleep(self.poll_interval).await;
        }
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        self.ensure_stopped(name).await?;
        self.ensure_running(name).await
    }

    async fn inspect_existing(&self, name: &str) -> Result<ContainerInfo> {
        self.runtime.inspect(name).await?.ok_or_else(|| {
            SupervisorError::NotFound {
                name: name.to_owned(),
            }
            .into()
        })
    }
}
