//! Generated deployment artifacts.
//!
//! Generators are pure: each maps a configuration to an [`Artifact`] (a path
//! relative to the project root plus its text). [`write_artifact`] puts one on
//! disk.

mod compose;
mod debugger;
mod dockerfile;
mod restore;
mod scripts;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::{relative_to, resolve_in_project};
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::settings::LauncherSettings;

pub use compose::compose_descriptor;
pub use debugger::{launch_descriptor, tasks_descriptor};
pub use dockerfile::dockerfile;
pub use restore::{restore_script, RESTORE_SCRIPT};
pub(crate) use restore::SQLCMD;
pub use scripts::{startup_script, workspace_script, ScriptFlavor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Relative to the project root.
    pub relative_path: PathBuf,
    pub contents: String,
    /// Marked executable on unix hosts when written.
    pub executable: bool,
}

impl Artifact {
    pub fn new(relative_path: impl Into<PathBuf>, contents: String) -> Self {
        Self {
            relative_path: relative_path.into(),
            contents,
            executable: false,
        }
    }

    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }
}

/// Every per-instance artifact, in write order.
pub fn instance_artifacts(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    settings: &LauncherSettings,
    flavor: ScriptFlavor,
) -> Result<Vec<Artifact>> {
    Ok(vec![
        dockerfile(project, instance, settings),
        startup_script(project, instance, settings, flavor),
        workspace_script(project, instance, settings, flavor),
        launch_descriptor(project, instance, settings)?,
        tasks_descriptor(project, instance, flavor)?,
    ])
}

/// Write `artifact` under `root`. Unchanged files are left untouched.
pub fn write_artifact(root: &Path, artifact: &Artifact) -> Result<PathBuf> {
    let target = root.join(&artifact.relative_path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let unchanged = fs::read_to_string(&target).is_ok_and(|existing| existing == artifact.contents);
    if unchanged {
        log::debug!("{} is up to date", target.display());
    } else {
        fs::write(&target, &artifact.contents)?;
        log::debug!("Wrote {}", target.display());
    }

    #[cfg(unix)]
    if artifact.executable {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
    }

    Ok(target)
}

/// Project-relative form of a configured path, `./`-prefixed when below the root.
pub(crate) fn project_relative(project: &ProjectConfiguration, path: &Path) -> String {
    relative_to(
        &resolve_in_project(&project.root_path, path),
        &project.root_path,
    )
}

/// Directory, relative to the project root, that receives an instance's artifacts.
pub(crate) fn instance_dir(project: &ProjectConfiguration, instance: &InstanceConfig) -> PathBuf {
    let rel = project_relative(project, &instance.app_path);
    PathBuf::from(rel.strip_prefix("./").unwrap_or(&rel))
}
