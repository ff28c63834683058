//! Lambda Bootstrap - custom runtime loop
//!
//! Runs as the container's main process: fetches the next invocation from
//! the control API, hands it to the handler, and reports the result or the
//! error back. One invocation at a time, until the process is killed.

pub mod app;
pub mod config;
pub mod runtime;

pub use config::{ConfigError, RuntimeConfig};
pub use runtime::{start, CycleOutcome, HttpRuntimeApi, Runtime, RuntimeApi};
