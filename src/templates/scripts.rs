//! Per-instance startup and workspace scripts, in a POSIX shell and a
//! PowerShell flavour with the same subcommands.

use super::restore::SQLCMD;
use super::{instance_dir, Artifact};
use crate::paths::relative_to;
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::settings::LauncherSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    Sh,
    PowerShell,
}

impl ScriptFlavor {
    /// Flavour native to the machine the launcher runs on.
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Self::PowerShell
        } else {
            Self::Sh
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::PowerShell => "ps1",
        }
    }

    fn quote(self, value: &str) -> String {
        match self {
            Self::Sh => format!("'{}'", value.replace('\'', r"'\''")),
            Self::PowerShell => format!("'{}'", value.replace('\'', "''")),
        }
    }
}

/// Values shared by both scripts of one instance.
struct ScriptVars<'a> {
    flavor: ScriptFlavor,
    project: &'a ProjectConfiguration,
    instance: &'a InstanceConfig,
    settings: &'a LauncherSettings,
}

impl ScriptVars<'_> {
    /// Variable assignments at the top of every script.
    fn header(&self) -> String {
        let p = self.project;
        let pairs = [
            ("ENGINE", self.settings.engine.as_str()),
            ("BROKER", p.broker.container_name.as_str()),
            ("ADMIN", p.admin_ui.container_name.as_str()),
            ("CACHE", p.cache.container_name.as_str()),
            ("DB", p.database.container_name.as_str()),
            ("DB_USER", p.database.user.as_str()),
            ("DB_PASSWORD", p.database.password.as_str()),
            ("INSTANCE", self.instance.container_name.as_str()),
        ];
        let mut out = String::new();
        for (name, value) in pairs {
            let value = self.flavor.quote(value);
            match self.flavor {
                ScriptFlavor::Sh => out.push_str(&format!("{name}={value}\n")),
                ScriptFlavor::PowerShell => out.push_str(&format!("${name} = {value}\n")),
            }
        }
        let numbers = [
            ("ATTEMPTS", self.settings.readiness_attempts.max(1) as u64),
            ("INTERVAL", self.settings.readiness_interval_secs),
            (
                "CACHE_INDEX",
                u64::from(self.instance.cache_index.unwrap_or_default()),
            ),
        ];
        for (name, value) in numbers {
            match self.flavor {
                ScriptFlavor::Sh => out.push_str(&format!("{name}={value}\n")),
                ScriptFlavor::PowerShell => out.push_str(&format!("${name} = {value}\n")),
            }
        }
        out
    }

    fn urls(&self) -> Vec<(&'static str, String)> {
        let p = self.project;
        vec![
            ("Instance", format!("http://localhost:{}", self.instance.port)),
            ("Admin UI", format!("http://localhost:{}", p.admin_ui.port)),
            (
                "Broker management",
                format!("http://localhost:{}", p.broker.management_port),
            ),
            ("Database", format!("localhost,{}", p.database.port)),
            ("Cache", format!("localhost:{}", p.cache.port)),
        ]
    }
}

/// `start.sh` / `start.ps1`: brings up the dependencies in order, waits for the
/// cache and database, then starts the instance.
pub fn startup_script(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    settings: &LauncherSettings,
    flavor: ScriptFlavor,
) -> Artifact {
    let vars = ScriptVars {
        flavor,
        project,
        instance,
        settings,
    };
    let contents = match flavor {
        ScriptFlavor::Sh => startup_sh(&vars),
        ScriptFlavor::PowerShell => startup_ps1(&vars),
    };
    let path = instance_dir(project, instance).join(format!("start.{}", flavor.extension()));
    Artifact::new(path, contents).executable()
}

fn startup_sh(vars: &ScriptVars<'_>) -> String {
    let mut urls = String::new();
    for (label, url) in vars.urls() {
        urls.push_str(&format!("  echo \"{label}: {url}\"\n"));
    }
    format!(
        r#"#!/bin/sh
# Start {instance} and the services it depends on.
# usage: start.sh [start|stop|stop-all|restart|flush-cache]
set -e

{header}
wait_for() {{
  label="$1"
  shift
  i=0
  until "$ENGINE" exec "$@" >/dev/null 2>&1; do
    i=$((i + 1))
    if [ "$i" -ge "$ATTEMPTS" ]; then
      echo "$label is not ready after $ATTEMPTS attempts" >&2
      exit 1
    fi
    sleep "$INTERVAL"
  done
  echo "$label is ready"
}}

start_all() {{
  "$ENGINE" start "$BROKER"
  "$ENGINE" start "$ADMIN"
  "$ENGINE" start "$CACHE"
  "$ENGINE" start "$DB"
  wait_for cache "$CACHE" redis-cli ping
  wait_for database "$DB" {sqlcmd} -S localhost -U "$DB_USER" -P "$DB_PASSWORD" -Q "SELECT 1"
  "$ENGINE" start "$INSTANCE"
{urls}}}

case "${{1:-start}}" in
  start) start_all ;;
  stop) "$ENGINE" stop "$INSTANCE" ;;
  stop-all) "$ENGINE" stop "$INSTANCE" "$DB" "$CACHE" "$ADMIN" "$BROKER" ;;
  restart) "$ENGINE" restart "$INSTANCE" ;;
  flush-cache) "$ENGINE" exec "$CACHE" redis-cli -n "$CACHE_INDEX" FLUSHDB ;;
  *)
    echo "usage: $0 [start|stop|stop-all|restart|flush-cache]" >&2
    exit 2
    ;;
esac
"#,
        instance = vars.instance.container_name,
        header = vars.header(),
        sqlcmd = SQLCMD,
        urls = urls,
    )
}

fn startup_ps1(vars: &ScriptVars<'_>) -> String {
    let mut urls = String::new();
    for (label, url) in vars.urls() {
        urls.push_str(&format!("    Write-Host \"{label}: {url}\"\n"));
    }
    format!(
        r#"# Start {instance} and the services it depends on.
# usage: start.ps1 [start|stop|stop-all|restart|flush-cache]
param([string]$Command = "start")
$ErrorActionPreference = "Stop"

{header}
function Wait-For([string]$Label, [string[]]$ExecArgs) {{
    for ($i = 1; $i -le $ATTEMPTS; $i++) {{
        & $ENGINE exec @ExecArgs *> $null
        if ($LASTEXITCODE -eq 0) {{
            Write-Host "$Label is ready"
            return
        }}
        Start-Sleep -Seconds $INTERVAL
    }}
    Write-Error "$Label is not ready after $ATTEMPTS attempts"
    exit 1
}}

function Start-All {{
    & $ENGINE start $BROKER
    & $ENGINE start $ADMIN
    & $ENGINE start $CACHE
    & $ENGINE start $DB
    Wait-For "cache" @($CACHE, "redis-cli", "ping")
    Wait-For "database" @($DB, "{sqlcmd}", "-S", "localhost", "-U", $DB_USER, "-P", $DB_PASSWORD, "-Q", "SELECT 1")
    & $ENGINE start $INSTANCE
{urls}}}

switch ($Command) {{
    "start" {{ Start-All }}
    "stop" {{ & $ENGINE stop $INSTANCE }}
    "stop-all" {{ & $ENGINE stop $INSTANCE $DB $CACHE $ADMIN $BROKER }}
    "restart" {{ & $ENGINE restart $INSTANCE }}
    "flush-cache" {{ & $ENGINE exec $CACHE redis-cli -n $CACHE_INDEX FLUSHDB }}
    default {{
        Write-Error "usage: start.ps1 [start|stop|stop-all|restart|flush-cache]"
        exit 2
    }}
}}
"#,
        instance = vars.instance.container_name,
        header = vars.header(),
        sqlcmd = SQLCMD,
        urls = urls,
    )
}

/// `workspace.sh` / `workspace.ps1`: day-to-day operations on one instance.
pub fn workspace_script(
    project: &ProjectConfiguration,
    instance: &InstanceConfig,
    settings: &LauncherSettings,
    flavor: ScriptFlavor,
) -> Artifact {
    let vars = ScriptVars {
        flavor,
        project,
        instance,
        settings,
    };
    let dir = instance_dir(project, instance);
    let to_root = relative_to(std::path::Path::new(""), &dir);
    let contents = match flavor {
        ScriptFlavor::Sh => workspace_sh(&vars, &to_root),
        ScriptFlavor::PowerShell => workspace_ps1(&vars, &to_root),
    };
    Artifact::new(dir.join(format!("workspace.{}", flavor.extension())), contents).executable()
}

fn workspace_sh(vars: &ScriptVars<'_>, to_root: &str) -> String {
    format!(
        r#"#!/bin/sh
# Workspace operations for {instance}.
# usage: workspace.sh [logs|shell|rebuild|status]
set -e

{header}ROOT="$(cd "$(dirname "$0")/{to_root}" && pwd)"

case "${{1:-status}}" in
  logs) "$ENGINE" logs --follow --tail 200 "$INSTANCE" ;;
  shell) "$ENGINE" exec -it "$INSTANCE" "${{CONTAINER_SHELL:-sh}}" ;;
  rebuild)
    "$ENGINE" compose --project-directory "$ROOT" -f "$ROOT/{compose}" build "$INSTANCE"
    "$ENGINE" compose --project-directory "$ROOT" -f "$ROOT/{compose}" up --detach --no-deps "$INSTANCE"
    ;;
  status) "$ENGINE" ps --all --filter "name=$INSTANCE" ;;
  *)
    echo "usage: $0 [logs|shell|rebuild|status]" >&2
    exit 2
    ;;
esac
"#,
        instance = vars.instance.container_name,
        header = vars.header(),
        to_root = to_root,
        compose = crate::paths::COMPOSE_FILE,
    )
}

fn workspace_ps1(vars: &ScriptVars<'_>, to_root: &str) -> String {
    format!(
        r#"# Workspace operations for {instance}.
# usage: workspace.ps1 [logs|shell|rebuild|status]
param([string]$Command = "status")
$ErrorActionPreference = "Stop"

{header}$ROOT = (Resolve-Path (Join-Path $PSScriptRoot "{to_root}")).Path
$COMPOSE = Join-Path $ROOT "{compose}"
$SHELL_CMD = if ($env:CONTAINER_SHELL) {{ $env:CONTAINER_SHELL }} else {{ "sh" }}

switch ($Command) {{
    "logs" {{ & $ENGINE logs --follow --tail 200 $INSTANCE }}
    "shell" {{ & $ENGINE exec -it $INSTANCE $SHELL_CMD }}
    "rebuild" {{
        & $ENGINE compose --project-directory $ROOT -f $COMPOSE build $INSTANCE
        & $ENGINE compose --project-directory $ROOT -f $COMPOSE up --detach --no-deps $INSTANCE
    }}
    "status" {{ & $ENGINE ps --all --filter "name=$INSTANCE" }}
    default {{
        Write-Error "usage: workspace.ps1 [logs|shell|rebuild|status]"
        exit 2
    }}
}}
"#,
        instance = vars.instance.container_name,
        header = vars.header(),
        to_root = to_root,
        compose = crate::paths::COMPOSE_FILE,
    )
}
