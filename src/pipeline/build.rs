use std::fs;
use std::path::Path;

use chrono::Utc;

use super::{Orchestrator, PipelineResult, Stage};
use crate::error::{AppError, Result};
use crate::patcher::{patch_connection_config, PatchValues};
use crate::paths::{connection_config_path, resolve_in_project};
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::templates::{compose_descriptor, instance_artifacts, write_artifact, ScriptFlavor};
use crate::tooling::{provision_debug_tools, ProvisionOutcome};

impl Orchestrator {
    /// Validate `edits`, then generate every artifact and patch every
    /// instance's connection configuration. The engine is not touched.
    pub async fn build(&self, edits: &ProjectConfiguration) -> PipelineResult {
        let project = match self.prepare(edits) {
            Ok(project) => project,
            Err(result) => return result,
        };
        let root = project.root_path.clone();

        match provision_debug_tools(&self.http, &self.settings, &root).await {
            Ok(ProvisionOutcome::Installed) => self.ok("Debugger downloaded"),
            Ok(ProvisionOutcome::AlreadyPresent) => self.ok("Debugger already present"),
            Ok(ProvisionOutcome::Disabled) => log::debug!("Debugger provisioning disabled"),
            Err(e) => self.warn(&format!("Debugger download failed, continuing: {e}")),
        }

        self.enter(Stage::GeneratingArtifacts);
        if let Err(e) = self.write_descriptor(&project, false) {
            return self.abort(e, Some(project));
        }

        self.enter(Stage::PatchingConfigs);
        let mut outcomes = Vec::new();
        for instance in &project.instances {
            let result = self.build_instance(&project, instance);
            if !self.record(&mut outcomes, &instance.container_name, result) {
                break;
            }
        }

        let project = match self.touch(&root, &mut |doc| doc.last_built_at = Some(Utc::now())) {
            Ok(project) => project,
            Err(e) => return self.abort(e, Some(project)),
        };
        self.conclude("Build finished", project, outcomes)
    }

    pub(super) fn write_descriptor(
        &self,
        project: &ProjectConfiguration,
        include_all: bool,
    ) -> Result<()> {
        let artifact = compose_descriptor(project, &self.settings, include_all)?;
        let path = write_artifact(&project.root_path, &artifact)?;
        self.ok(&format!("Wrote {}", path.display()));
        Ok(())
    }

    fn build_instance(
        &self,
        project: &ProjectConfiguration,
        instance: &InstanceConfig,
    ) -> Result<String> {
        let app_path = resolve_in_project(&project.root_path, &instance.app_path);
        let config_path = connection_config_path(&app_path).ok_or_else(|| {
            AppError::validation(format!(
                "No connection configuration found in {}",
                app_path.display()
            ))
        })?;
        self.patch_instance_config(project, instance, &config_path)?;

        for artifact in instance_artifacts(project, instance, &self.settings, ScriptFlavor::host())? {
            write_artifact(&project.root_path, &artifact)?;
        }
        Ok("artifacts written".to_string())
    }

    fn patch_instance_config(
        &self,
        project: &ProjectConfiguration,
        instance: &InstanceConfig,
        path: &Path,
    ) -> Result<()> {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::io(format!("Failed to read {}: {}", path.display(), e)))?;
        let values = PatchValues::for_instance(project, instance, &self.settings);
        let (patched, report) = patch_connection_config(&text, &values);

        for key in &report.missing {
            self.warn(&format!(
                "{}: '{}' not found in {}",
                instance.container_name,
                key,
                path.display()
            ));
        }
        if !report.updated.is_empty() {
            fs::write(path, patched)
                .map_err(|e| AppError::io(format!("Failed to write {}: {}", path.display(), e)))?;
            self.emit(&format!(
                "{}: updated {}",
                instance.container_name,
                report.updated.join(", ")
            ));
        }
        Ok(())
    }
}
