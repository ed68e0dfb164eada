//! Deployment orchestration.
//!
//! [`Orchestrator`] sequences validation, artifact generation, config patching
//! and engine invocation for `build`, `run` and `stop`. Collaborators are
//! handed in at construction; nothing here reaches for global state.

mod build;
mod run;

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use reqwest::Client;
use serde::Serialize;

use crate::engine::ContainerEngine;
use crate::error::AppError;
use crate::project::{merge_edits, ProjectConfiguration, ProjectStore};
use crate::settings::LauncherSettings;
use crate::validation::validate_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    GeneratingArtifacts,
    PatchingConfigs,
    EngineStarting(StartPhase),
    AwaitingReadiness,
    RestoringBackups,
    PostStartFixups,
    Stopping,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating configuration",
            Self::GeneratingArtifacts => "generating artifacts",
            Self::PatchingConfigs => "patching instance configuration",
            Self::EngineStarting(StartPhase::First) => "starting containers",
            Self::EngineStarting(StartPhase::Second) => "starting containers with new instances",
            Self::AwaitingReadiness => "waiting for database and cache",
            Self::RestoringBackups => "restoring databases",
            Self::PostStartFixups => "preparing instances",
            Self::Stopping => "stopping containers",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Receives human-readable progress lines.
pub trait LogSink: Send + Sync {
    fn line(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn line(&self, line: &str) {
        self(line)
    }
}

/// Whether a failing instance stops the instances after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstanceFailurePolicy {
    #[default]
    FailFast,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOutcome {
    pub instance: String,
    pub success: bool,
    pub message: String,
}

/// Terminal value of `build`, `run` and `stop`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub success: bool,
    pub message: String,
    pub configuration: Option<ProjectConfiguration>,
    pub instances: Vec<InstanceOutcome>,
    /// Machine-readable error, when the failure came from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

impl PipelineResult {
    fn succeeded(
        message: impl Into<String>,
        configuration: ProjectConfiguration,
        instances: Vec<InstanceOutcome>,
    ) -> Self {
        Self {
            success: true,
            message: message.into(),
            configuration: Some(configuration),
            instances,
            error: None,
        }
    }

    fn failed(message: impl Into<String>, configuration: Option<ProjectConfiguration>) -> Self {
        Self {
            success: false,
            message: message.into(),
            configuration,
            instances: Vec::new(),
            error: None,
        }
    }
}

pub struct Orchestrator {
    settings: Arc<LauncherSettings>,
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn ProjectStore>,
    sink: Arc<dyn LogSink>,
    http: Client,
    policy: InstanceFailurePolicy,
    stage: Mutex<Stage>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<LauncherSettings>,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn ProjectStore>,
        sink: Arc<dyn LogSink>,
        http: Client,
    ) -> Self {
        Self {
            settings,
            engine,
            store,
            sink,
            http,
            policy: InstanceFailurePolicy::default(),
            stage: Mutex::new(Stage::Idle),
        }
    }

    pub fn with_policy(mut self, policy: InstanceFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
        log::info!("Stage: {}", stage);
        self.sink.line(&format!("» {stage}"));
    }

    fn emit(&self, line: &str) {
        self.sink.line(line);
    }

    fn ok(&self, message: &str) {
        log::info!("{}", message);
        self.sink.line(&format!("✔ {message}"));
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", message);
        self.sink.line(&format!("✖ {message}"));
    }

    /// Turn an error that escaped a stage into the terminal result.
    fn abort(&self, err: AppError, configuration: Option<ProjectConfiguration>) -> PipelineResult {
        self.enter(Stage::Failed);
        let message = describe(&err);
        log::error!("{}", err);
        self.sink.line(&format!("✖ {message}"));
        PipelineResult {
            error: Some(err),
            ..PipelineResult::failed(message, configuration)
        }
    }

    /// Persist `edits` (merged into whatever is on disk) and validate the result.
    fn prepare(&self, edits: &ProjectConfiguration) -> Result<ProjectConfiguration, PipelineResult> {
        self.enter(Stage::Validating);
        let root = edits.root_path.as_path();
        let saved = if self.store.exists(root) {
            self.store.update(root, &mut |doc| {
                merge_edits(doc, edits);
                Ok(())
            })
        } else {
            self.store.save(edits).map(|()| edits.clone())
        };
        let project = saved.map_err(|e| self.abort(e, Some(edits.clone())))?;

        let validation = validate_all(&project);
        if !validation.success {
            self.enter(Stage::Failed);
            self.sink.line(&format!("✖ {}", validation.message));
            return Err(PipelineResult::failed(validation.message, Some(project)));
        }
        self.ok("Configuration is valid");
        Ok(project)
    }

    fn touch(
        &self,
        root: &Path,
        f: &mut dyn FnMut(&mut ProjectConfiguration),
    ) -> crate::error::Result<ProjectConfiguration> {
        self.store.update(root, &mut |doc| {
            f(doc);
            Ok(())
        })
    }

    /// Record one instance's result. Returns `false` when the loop must stop.
    fn record(
        &self,
        outcomes: &mut Vec<InstanceOutcome>,
        instance: &str,
        result: crate::error::Result<String>,
    ) -> bool {
        match result {
            Ok(message) => {
                self.ok(&format!("{instance}: {message}"));
                outcomes.push(InstanceOutcome {
                    instance: instance.to_string(),
                    success: true,
                    message,
                });
                true
            }
            Err(e) => {
                let message = describe(&e);
                self.warn(&format!("{instance}: {message}"));
                outcomes.push(InstanceOutcome {
                    instance: instance.to_string(),
                    success: false,
                    message,
                });
                self.policy == InstanceFailurePolicy::Continue
            }
        }
    }

    /// Final result of a run over instances; failure when any instance failed.
    fn conclude(
        &self,
        done: &str,
        configuration: ProjectConfiguration,
        outcomes: Vec<InstanceOutcome>,
    ) -> PipelineResult {
        let failed: Vec<&InstanceOutcome> = outcomes.iter().filter(|o| !o.success).collect();
        if failed.is_empty() {
            self.enter(Stage::Done);
            self.ok(done);
            return PipelineResult::succeeded(done, configuration, outcomes);
        }

        self.enter(Stage::Failed);
        let message = if failed.len() == 1 {
            format!("Instance '{}' failed: {}", failed[0].instance, failed[0].message)
        } else {
            format!("{} instances failed", failed.len())
        };
        self.sink.line(&format!("✖ {message}"));
        PipelineResult {
            instances: outcomes,
            ..PipelineResult::failed(message, Some(configuration))
        }
    }
}

/// One-line human description of an error.
fn describe(err: &AppError) -> String {
    use crate::error::ErrorKind;
    match err.kind() {
        ErrorKind::Process => match (err.detail("command"), err.detail("stderr")) {
            (Some(command), Some(stderr)) if !stderr.is_empty() => {
                format!("`{command}` failed: {stderr}")
            }
            (Some(command), _) => format!(
                "`{command}` failed with exit code {}",
                err.detail("exit_code").unwrap_or("unknown")
            ),
            _ => err.detail("detail").map_or_else(|| err.to_string(), str::to_string),
        },
        ErrorKind::ReadinessTimeout => format!(
            "{} is not ready after {} attempts",
            err.detail("target").unwrap_or("dependency"),
            err.detail("attempts").unwrap_or("several")
        ),
        ErrorKind::EngineMissing => format!(
            "Container engine '{}' is not installed: {}",
            err.detail("engine").unwrap_or_default(),
            err.detail("detail").unwrap_or_default()
        ),
        ErrorKind::EngineUnreachable => format!(
            "Container engine '{}' is not running: {}",
            err.detail("engine").unwrap_or_default(),
            err.detail("detail").unwrap_or_default()
        ),
        _ => err
            .detail("detail")
            .map_or_else(|| err.to_string(), str::to_string),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::project::JsonProjectStore;
    use crate::testutil::{ProjectFixture, RecordingEngine};

    pub struct Harness {
        pub fixture: ProjectFixture,
        pub engine: Arc<RecordingEngine>,
        pub store: Arc<JsonProjectStore>,
        pub lines: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        pub fn new(instances: &[&str]) -> Self {
            Self {
                fixture: ProjectFixture::new(instances),
                engine: Arc::new(RecordingEngine::default()),
                store: Arc::new(JsonProjectStore::new()),
                lines: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn orchestrator(&self) -> Orchestrator {
            let settings = LauncherSettings {
                readiness_attempts: 2,
                readiness_interval_secs: 0,
                startup_delay_secs: 0,
                ..LauncherSettings::default()
            };
            let lines = Arc::clone(&self.lines);
            let sink = move |line: &str| lines.lock().unwrap().push(line.to_string());
            Orchestrator::new(
                Arc::new(settings),
                Arc::clone(&self.engine) as Arc<dyn ContainerEngine>,
                Arc::clone(&self.store) as Arc<dyn ProjectStore>,
                Arc::new(sink),
                Client::new(),
            )
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }
}
