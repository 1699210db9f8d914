//! [`ContainerRuntime`] backed by the `docker` command line client.

use crate::process::supervisor::{ContainerInfo, ContainerRuntime};
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

const INSPECT_FORMAT: &str = "{{.State.Status}}|{{.Config.StopTimeout}}";

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<Output> {
        tracing::trace!(target: "orchestrator::supervisor", ?args, "invoking docker");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {} {}", self.binary, args.join(" ")))
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let output = self
            .docker(&["inspect", "--type", "container", "--format", INSPECT_FORMAT, name])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such object") || stderr.contains("No such container") {
                return Ok(None);
            }
            bail!("docker inspect {name} failed: {}", stderr.trim());
        }

        parse_inspect(&String::from_utf8_lossy(&output.stdout))
            .with_context(|| format!("unexpected docker inspect output for {name}"))
            .map(Some)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let output = self.docker(&["start", name]).await?;
        ensure_success("start", name, &output)
    }

    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<()> {
        let seconds = timeout.as_secs().to_string();
        let output = self.docker(&["stop", "--time", &seconds, name]).await?;
        ensure_success("stop", name, &output)
    }
}

impl ContainerRuntime for DockerCli {
    fn inspect<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<ContainerInfo>>> {
        Box::pin(self.inspect_container(name))
    }

    fn start<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.start_container(name))
    }

    fn stop<'a>(&'a self, name: &'a str, timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.stop_container(name, timeout))
    }
}

fn ensure_success(action: &str, name: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    bail!(
        "docker {action} {name} failed with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )
}

fn parse_inspect(stdout: &str) -> Result<ContainerInfo> {
    let line = stdout.trim();
    let (status, stop_timeout) = line
        .split_once('|')
        .with_context(|| format!("expected '<status>|<stop timeout>', got '{line}'"))?;

    // `restarting` still owns the process; treat it as running so a stop is issued.
    let running = matches!(status.trim(), "running" | "restarting");
    let stop_timeout = stop_timeout
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs);

    Ok(ContainerInfo {
        running,
        stop_timeout,
    })
}
