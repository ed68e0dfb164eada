//! Command handlers behind the CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;

use crate::engine::{CliEngine, ContainerEngine};
use crate::error::{AppError, Result};
use crate::paths::apps_dir;
use crate::pipeline::{InstanceFailurePolicy, LogSink, Orchestrator, PipelineResult};
use crate::project::{JsonProjectStore, ProjectConfiguration, ProjectStore};
use crate::settings::LauncherSettings;
use crate::validation::{validate_all, ValidationResult};

/// Long-lived collaborators shared by every command.
pub struct AppState {
    pub settings: Arc<LauncherSettings>,
    pub store: Arc<JsonProjectStore>,
    pub engine: Arc<dyn ContainerEngine>,
    pub sink: Arc<dyn LogSink>,
    pub client: Client,
}

impl AppState {
    pub fn new(settings: LauncherSettings, sink: Arc<dyn LogSink>, client: Client) -> Self {
        let engine: Arc<dyn ContainerEngine> = Arc::new(CliEngine::new(settings.engine.clone()));
        Self {
            settings: Arc::new(settings),
            store: Arc::new(JsonProjectStore::new()),
            engine,
            sink,
            client,
        }
    }

    fn orchestrator(&self, policy: InstanceFailurePolicy) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.engine),
            Arc::clone(&self.store) as Arc<dyn ProjectStore>,
            Arc::clone(&self.sink),
            self.client.clone(),
        )
        .with_policy(policy)
    }
}

/// Absolute form of a project root given on the command line.
pub fn project_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .map_err(|e| AppError::config(format!("Project root {}: {}", root.display(), e)))
}

/// Create the project document and the directories the default layout expects.
pub fn init_project(state: &AppState, root: &Path, name: &str) -> Result<ProjectConfiguration> {
    fs::create_dir_all(root)?;
    let root = project_root(root)?;
    let project = state.store.init(&root, name)?;

    fs::create_dir_all(apps_dir(&root))?;
    for volume in [
        &project.database.volume_path,
        &project.admin_ui.volume_path,
        &project.cache.volume_path,
        &project.broker.volume_path,
    ] {
        fs::create_dir_all(volume)?;
    }
    Ok(project)
}

pub fn validate_project(state: &AppState, root: &Path) -> Result<ValidationResult> {
    let project = state.store.load(&project_root(root)?)?;
    Ok(validate_all(&project))
}

pub async fn build_project(state: &AppState, root: &Path) -> Result<PipelineResult> {
    let project = state.store.load(&project_root(root)?)?;
    Ok(state
        .orchestrator(InstanceFailurePolicy::FailFast)
        .build(&project)
        .await)
}

pub async fn run_project(
    state: &AppState,
    root: &Path,
    policy: InstanceFailurePolicy,
) -> Result<PipelineResult> {
    let project = state.store.load(&project_root(root)?)?;
    Ok(state.orchestrator(policy).run(&project).await)
}

pub async fn stop_project(state: &AppState, root: &Path) -> Result<PipelineResult> {
    Ok(state
        .orchestrator(InstanceFailurePolicy::FailFast)
        .stop(&project_root(root)?)
        .await)
}
