use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug)]
pub enum ToolError {
    Spawn { tool: String, detail: String },
    Failed { tool: String, status: String, output: String },
    MissingOutput { tool: String, path: PathBuf },
    EmptyOutput { tool: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Spawn { tool, detail } => write!(f, "failed to spawn {tool}: {detail}"),
            ToolError::Failed {
                tool,
                status,
                output,
            } => write!(f, "{tool} failed with {status}; output:\n{output}"),
            ToolError::MissingOutput { tool, path } => write!(
                f,
                "{tool} exited successfully but did not produce {}",
                path.display()
            ),
            ToolError::EmptyOutput { tool } => {
                write!(f, "{tool} exited successfully but printed nothing")
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Runs an executable to completion. Implementations never retry.
pub trait ToolRunner: Send + Sync {
    fn run<'a>(&'a self, tool: &'a str, args: &'a [String]) -> BoxFuture<'a, Result<ToolOutput>>;
}

/// Spawns tools from `PATH` with piped output.
#[derive(Debug, Clone, Default)]
pub struct ExternalToolInvoker;

impl ExternalToolInvoker {
    pub fn new() -> Self {
        Self
    }

    pub async fn invoke(&self, tool: &str, args: &[String]) -> Result<ToolOutput> {
        tracing::info!(target: "orchestrator::tools", tool, ?args, "running external tool");

        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| ToolError::Spawn {
                tool: tool.to_owned(),
                detail: err.to_string(),
            })?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            tracing::error!(
                target: "orchestrator::tools",
                tool,
                status = %output.status,
                "external tool failed"
            );
            return Err(ToolError::Failed {
                tool: tool.to_owned(),
                status: output.status.to_string(),
                output: result.combined(),
            }
            .into());
        }

        tracing::debug!(
            target: "orchestrator::tools",
            tool,
            stdout = %result.stdout.trim_end(),
            stderr = %result.stderr.trim_end(),
            "external tool completed"
        );
        Ok(result)
    }
}

impl ToolRunner for ExternalToolInvoker {
    fn run<'a>(&'a self, tool: &'a str, args: &'a [String]) -> BoxFuture<'a, Result<ToolOutput>> {
        Box::pin(self.invoke(tool, args))
    }
}
