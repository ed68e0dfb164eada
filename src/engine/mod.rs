//! Container engine gateway.
//!
//! Everything the launcher asks of the container engine goes through the
//! [`ContainerEngine`] trait: run a command to completion, stream its output
//! line by line, or capture its stdout. [`EngineOps`] builds the typed engine
//! commands (network, compose, exec, container lifecycle) on top of it.

mod cli;
mod ops;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use cli::CliEngine;
pub use ops::{EngineInfo, EngineOps, NetworkState};

/// Receives each stdout/stderr line of a streamed command as it arrives.
pub type LineHandler<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Executable name, used in messages.
    fn program(&self) -> &str;

    /// Run to completion. Non-zero exit yields a process error carrying stderr.
    async fn run(&self, args: &[String], cwd: &Path) -> Result<()>;

    /// Run to completion and return stdout.
    async fn run_captured(&self, args: &[String], cwd: &Path) -> Result<String>;

    /// Run to completion, handing every output line to `on_line` as it arrives.
    async fn run_streaming(
        &self,
        args: &[String],
        cwd: &Path,
        on_line: LineHandler<'_>,
    ) -> Result<()>;
}

/// `["a", "b"]` -> owned argument vector.
pub fn args<S: AsRef<str>>(parts: &[S]) -> Vec<String> {
    parts.iter().map(|p| p.as_ref().to_string()).collect()
}
