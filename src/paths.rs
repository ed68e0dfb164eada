//! Centralized path utilities for the launcher and the project layout.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

/// Persisted project document, at the project root.
pub const PROJECT_FILE: &str = "stack-project.json";

/// Generated deployment descriptor, at the project root.
pub const COMPOSE_FILE: &str = "docker-compose.yml";

/// Every instance application must live below this project subdirectory.
pub const APPS_DIR: &str = "apps";

/// Required application descriptor inside an instance application path.
pub const APP_DESCRIPTOR: &str = "Web.config";

/// Alternative files holding the connection strings, in lookup order.
pub const CONNECTION_STRING_HOLDERS: [&str; 2] =
    ["ConnectionStrings.config", "App_Config/ConnectionStrings.config"];

pub const BACKUP_EXTENSION: &str = ".bak";

/// Directory under the project root where auxiliary tooling is kept.
pub const TOOLS_DIR: &str = ".tools";

/// Name of the remote debugger directory, both in the tools dir and in instance volumes.
pub const DEBUGGER_DIR: &str = "vsdbg";

/// Mount points inside the containers.
pub mod container {
    pub const DATABASE_DATA: &str = "/var/opt/mssql";
    pub const DATABASE_BACKUPS: &str = "/var/opt/mssql/backups";
    pub const ADMIN_UI_DATA: &str = "/data";
    pub const CACHE_DATA: &str = "/data";
    pub const BROKER_DATA: &str = "/var/lib/rabbitmq";
    pub const INSTANCE_DATA: &str = "/app/data";
    pub const INSTANCE_ROOT: &str = "/inetpub/wwwroot";

    /// Ports the services listen on inside the project network.
    pub const DATABASE_PORT: u16 = 1433;
    pub const ADMIN_UI_PORT: u16 = 8080;
    pub const CACHE_PORT: u16 = 6379;
    pub const BROKER_PORT: u16 = 5672;
    pub const BROKER_MANAGEMENT_PORT: u16 = 15672;
    pub const INSTANCE_PORT: u16 = 80;
}

/// Get the root data directory for the launcher (~/.stack_launcher).
pub fn get_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| AppError::config("Cannot find home directory"))?;
    Ok(home.join(".stack_launcher"))
}

/// Get the path to the launcher settings file.
pub fn settings_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("settings.toml"))
}

/// Ensure the launcher data directory exists.
pub fn ensure_data_dir() -> Result<()> {
    let base = get_data_dir()?;
    fs::create_dir_all(&base).map_err(|e| AppError::io(e.to_string()))
}

pub fn project_file(root: &Path) -> PathBuf {
    root.join(PROJECT_FILE)
}

pub fn compose_file(root: &Path) -> PathBuf {
    root.join(COMPOSE_FILE)
}

pub fn apps_dir(root: &Path) -> PathBuf {
    root.join(APPS_DIR)
}

/// Where the downloaded debugger lives inside the project.
pub fn debug_tools_dir(root: &Path) -> PathBuf {
    root.join(TOOLS_DIR).join(DEBUGGER_DIR)
}

/// Locate the connection-string holder of an instance application, if any.
pub fn connection_config_path(app_path: &Path) -> Option<PathBuf> {
    CONNECTION_STRING_HOLDERS
        .iter()
        .map(|name| app_path.join(name))
        .find(|candidate| candidate.is_file())
}

/// Express `path` relative to `base` using `/` separators, walking up with `..`
/// when `path` is not below `base`. Both paths are compared lexically.
pub fn relative_to(path: &Path, base: &Path) -> String {
    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common == 0 && path.is_absolute() {
        return path.to_string_lossy().replace('\\', "/");
    }

    let mut segments: Vec<String> = Vec::new();
    for part in &base_parts[common..] {
        if matches!(part, Component::Normal(_)) {
            segments.push("..".to_string());
        }
    }
    for part in &path_parts[common..] {
        if let Component::Normal(segment) = part {
            segments.push(segment.to_string_lossy().into_owned());
        }
    }

    if segments.is_empty() {
        ".".to_string()
    } else if segments[0] == ".." {
        segments.join("/")
    } else {
        format!("./{}", segments.join("/"))
    }
}

/// Resolve a configured path against the project root when it is relative.
pub fn resolve_in_project(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
