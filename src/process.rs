//! External processes: the chain containers and the transform/verification
//! executables.

pub mod docker;
pub mod supervisor;
pub mod tool;

pub use docker::DockerCli;
pub use supervisor::{
    ContainerInfo, ContainerRuntime, ContainerStatus, ProcessSupervisor, SupervisorError,
};
pub use tool::{ExternalToolInvoker, ToolError, ToolOutput, ToolRunner};
