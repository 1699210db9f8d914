//! Runtime glue that wires configuration, the snapshot layout, telemetry, and
//! the runner.

pub mod config;
pub mod layout;
pub mod runner;
pub mod telemetry;
