//! Editor debugger-attach descriptors (`.vscode/launch.json`, `.vscode/tasks.json`).

use serde_json::json;

use super::{instance_dir, Artifact, ScriptFlavor};
use crate::error::Result;
use crate::paths::{container, DEBUGGER_DIR};
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::settings::LauncherSettings;

/// Attach configuration piping the debugger through `<engine> exec -i`.
pub fn launch_descriptor(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    settings: &LauncherSettings,
) -> Result<Artifact> {
    let name = &instance.container_name;
    let app_root = container::INSTANCE_ROOT;
    let doc = json!({
        "version": "0.2.0",
        "configurations": [{
            "name": format!("Attach to {name}"),
            "type": "clr",
            "request": "attach",
            "processId": "${command:pickRemoteProcess}",
            "pipeTransport": {
                "pipeCwd": "${workspaceFolder}",
                "pipeProgram": settings.engine,
                "pipeArgs": ["exec", "-i", name],
                "debuggerPath": format!("{}/{}/vsdbg", container::INSTANCE_DATA, DEBUGGER_DIR),
                "quoteArgs": false
            },
            "sourceFileMap": {
                app_root: "${workspaceFolder}"
            },
            "preLaunchTask": format!("start {name}")
        }]
    });
    Ok(Artifact::new(
        instance_dir(project, instance).join(".vscode").join("launch.json"),
        serde_json::to_string_pretty(&doc)? + "\n",
    ))
}

/// Tasks wrapping the instance scripts.
pub fn tasks_descriptor(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    flavor: ScriptFlavor,
) -> Result<Artifact> {
    let name = &instance.container_name;
    let (start, workspace) = match flavor {
        ScriptFlavor::Sh => ("./start.sh", "./workspace.sh"),
        ScriptFlavor::PowerShell => ("./start.ps1", "./workspace.ps1"),
    };
    let task = |label: String, script: &str, arg: &str| {
        let command = match flavor {
            ScriptFlavor::Sh => json!(script),
            ScriptFlavor::PowerShell => json!("pwsh"),
        };
        let args = match flavor {
            ScriptFlavor::Sh => json!([arg]),
            ScriptFlavor::PowerShell => json!(["-File", script, arg]),
        };
        json!({
            "label": label,
            "type": "shell",
            "command": command,
            "args": args,
            "options": { "cwd": "${workspaceFolder}" },
            "problemMatcher": []
        })
    };

    let doc = json!({
        "version": "2.0.0",
        "tasks": [
            task(format!("start {name}"), start, "start"),
            task(format!("stop {name}"), start, "stop"),
            task(format!("restart {name}"), start, "restart"),
            task(format!("flush cache of {name}"), start, "flush-cache"),
            task(format!("logs of {name}"), workspace, "logs"),
            task(format!("rebuild {name}"), workspace, "rebuild"),
        ]
    });
    Ok(Artifact::new(
        instance_dir(project, instance).join(".vscode").join("tasks.json"),
        serde_json::to_string_pretty(&doc)? + "\n",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ProjectFixture;

    #[test]
    fn launch_pipes_through_engine_exec() {
        let fixture = ProjectFixture::new(&["site"]);
        let artifact = launch_descriptor(
            &fixture.config,
            &fixture.config.instances[0],
            &LauncherSettings::default(),
        )
        .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&artifact.contents).unwrap();
        let config = &doc["configurations"][0];
        assert_eq!(config["pipeTransport"]["pipeProgram"], "docker");
        assert_eq!(config["pipeTransport"]["pipeArgs"], json!(["exec", "-i", "site"]));
        assert_eq!(
            config["pipeTransport"]["debuggerPath"],
            "/app/data/vsdbg/vsdbg"
        );
        assert_eq!(config["preLaunchTask"], "start site");
    }

    #[test]
    fn tasks_reference_the_prelaunch_label() {
        let fixture = ProjectFixture::new(&["site"]);
        let artifact =
            tasks_descriptor(&fixture.config, &fixture.config.instances[0], ScriptFlavor::Sh)
                .unwrap();
        assert_eq!(
            artifact.relative_path,
            std::path::PathBuf::from("apps/site/.vscode/tasks.json")
        );
        let doc: serde_json::Value = serde_json::from_str(&artifact.contents).unwrap();
        let tasks = doc["tasks"].as_array().unwrap();
        assert_eq!(tasks[0]["label"], "start site");
        assert_eq!(tasks[0]["command"], "./start.sh");
        assert_eq!(tasks[3]["args"], json!(["flush-cache"]));
    }
}
