//! Typed engine commands.

use std::path::Path;

use semver::Version;

use super::{args, ContainerEngine, LineHandler};
use crate::error::{AppError, ErrorKind, Result};
use crate::paths::COMPOSE_FILE;

/// Result of an idempotent network creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Created,
    AlreadyExists,
}

/// What the engine reported about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    /// `None` when the version banner could not be parsed.
    pub version: Option<Version>,
    pub banner: String,
}

/// Engine commands run from one working directory, normally the project root.
pub struct EngineOps<'a> {
    engine: &'a dyn ContainerEngine,
    cwd: &'a Path,
}

impl<'a> EngineOps<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, cwd: &'a Path) -> Self {
        Self { engine, cwd }
    }

    pub async fn version(&self) -> Result<EngineInfo> {
        let banner = self
            .engine
            .run_captured(&args(&["--version"]), self.cwd)
            .await?;
        let banner = banner.trim().to_string();
        Ok(EngineInfo {
            version: parse_engine_version(&banner),
            banner,
        })
    }

    pub async fn info(&self) -> Result<String> {
        self.engine
            .run_captured(&args(&["info", "--format", "{{.ServerVersion}}"]), self.cwd)
            .await
    }

    /// Installed binary and reachable daemon, or an environment error.
    pub async fn ensure_available(&self) -> Result<EngineInfo> {
        let program = self.engine.program();
        let info = self
            .version()
            .await
            .map_err(|e| AppError::engine_missing(program, e.to_string()))?;
        self.info()
            .await
            .map_err(|e| AppError::engine_unreachable(program, e.to_string()))?;
        Ok(info)
    }

    pub async fn network_create(&self, name: &str) -> Result<NetworkState> {
        match self
            .engine
            .run(&args(&["network", "create", name]), self.cwd)
            .await
        {
            Ok(()) => Ok(NetworkState::Created),
            Err(e) if stderr_mentions(&e, &["already exists"]) => {
                log::debug!("Network {} already exists", name);
                Ok(NetworkState::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn network_remove(&self, name: &str) -> Result<()> {
        match self
            .engine
            .run(&args(&["network", "rm", name]), self.cwd)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if stderr_mentions(&e, &["not found", "no such network"]) => {
                log::debug!("Network {} was already removed", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn compose_up(&self, on_line: LineHandler<'_>) -> Result<()> {
        self.engine
            .run_streaming(
                &args(&["compose", "-f", COMPOSE_FILE, "up", "--detach", "--wait"]),
                self.cwd,
                on_line,
            )
            .await
    }

    pub async fn compose_down(&self, on_line: LineHandler<'_>) -> Result<()> {
        self.engine
            .run_streaming(&args(&["compose", "-f", COMPOSE_FILE, "down"]), self.cwd, on_line)
            .await
    }

    /// `exec <container> <command...>`, returning stdout.
    pub async fn exec(&self, container: &str, command: &[&str]) -> Result<String> {
        let mut full = vec!["exec".to_string(), container.to_string()];
        full.extend(command.iter().map(|c| c.to_string()));
        self.engine.run_captured(&full, self.cwd).await
    }

    pub async fn start(&self, container: &str) -> Result<()> {
        self.lifecycle("start", container).await
    }

    pub async fn stop(&self, container: &str) -> Result<()> {
        self.lifecycle("stop", container).await
    }

    pub async fn restart(&self, container: &str) -> Result<()> {
        self.lifecycle("restart", container).await
    }

    async fn lifecycle(&self, verb: &str, container: &str) -> Result<()> {
        log::info!("{} {}", verb, container);
        self.engine.run(&args(&[verb, container]), self.cwd).await
    }
}

fn stderr_mentions(err: &AppError, needles: &[&str]) -> bool {
    if err.kind() != ErrorKind::Process {
        return false;
    }
    let stderr = err.detail("stderr").unwrap_or_default().to_lowercase();
    needles.iter().any(|n| stderr.contains(n))
}

/// Pull the first semver-looking token out of a `--version` banner, e.g.
/// `Docker version 27.3.1, build ce12230` or `podman version 5.2`.
pub fn parse_engine_version(banner: &str) -> Option<Version> {
    banner.split_whitespace().find_map(|token| {
        let token = token.trim_end_matches(',').trim_start_matches('v');
        if let Ok(v) = Version::parse(token) {
            return Some(v);
        }
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() == 2 && parts.iter().all(|p| p.parse::<u64>().is_ok()) {
            return Version::parse(&format!("{token}.0")).ok();
        }
        None
    })
}
