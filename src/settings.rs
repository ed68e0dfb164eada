//! Launcher-wide settings.
//!
//! Loaded once at startup and handed to every component by reference; nothing
//! mutates a `LauncherSettings` after construction.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::{ensure_data_dir, settings_path};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherSettings {
    /// Container engine executable, looked up on PATH.
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_database_image")]
    pub database_image: String,
    #[serde(default = "default_admin_ui_image")]
    pub admin_ui_image: String,
    #[serde(default = "default_cache_image")]
    pub cache_image: String,
    #[serde(default = "default_broker_image")]
    pub broker_image: String,
    /// Instance images are built `FROM {instance_base_image}:{runtime_tag}`.
    #[serde(default = "default_instance_base_image")]
    pub instance_base_image: String,
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    #[serde(default = "default_readiness_interval_secs")]
    pub readiness_interval_secs: u64,
    /// Unconditional pause after the first engine start.
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    /// Archive (.zip or .tar.gz) holding the remote debugger. Empty disables provisioning.
    #[serde(default)]
    pub debug_tools_url: String,
    #[serde(default = "default_database_connection")]
    pub database_connection_name: String,
    #[serde(default = "default_cache_connection")]
    pub cache_connection_name: String,
    #[serde(default = "default_broker_connection")]
    pub broker_connection_name: String,
    /// App settings forced to fixed values when connection configs are patched.
    #[serde(default = "default_app_flags")]
    pub app_flags: BTreeMap<String, String>,
}

fn default_engine() -> String {
    "docker".to_string()
}

fn default_database_image() -> String {
    "mcr.microsoft.com/mssql/server:2019-latest".to_string()
}

fn default_admin_ui_image() -> String {
    "adminer:latest".to_string()
}

fn default_cache_image() -> String {
    "redis:7-alpine".to_string()
}

fn default_broker_image() -> String {
    "rabbitmq:3-management".to_string()
}

fn default_instance_base_image() -> String {
    "mcr.microsoft.com/dotnet/framework/aspnet".to_string()
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_readiness_interval_secs() -> u64 {
    2
}

fn default_startup_delay_secs() -> u64 {
    20
}

fn default_database_connection() -> String {
    "core".to_string()
}

fn default_cache_connection() -> String {
    "redis.sessions".to_string()
}

fn default_broker_connection() -> String {
    "messaging".to_string()
}

fn default_app_flags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Diagnostics.Enabled".to_string(), "true".to_string()),
        ("Hosting.Container".to_string(), "true".to_string()),
        ("Https.Required".to_string(), "false".to_string()),
    ])
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            database_image: default_database_image(),
            admin_ui_image: default_admin_ui_image(),
            cache_image: default_cache_image(),
            broker_image: default_broker_image(),
            instance_base_image: default_instance_base_image(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_secs: default_readiness_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            debug_tools_url: String::new(),
            database_connection_name: default_database_connection(),
            cache_connection_name: default_cache_connection(),
            broker_connection_name: default_broker_connection(),
            app_flags: default_app_flags(),
        }
    }
}

impl LauncherSettings {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}

/// Read settings from `path`, writing defaults there first if it does not exist.
pub fn load_settings_from(path: &Path) -> Result<LauncherSettings> {
    if !path.exists() {
        let settings = LauncherSettings::default();
        save_settings_to(path, &settings)?;
        return Ok(settings);
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

pub fn save_settings_to(path: &Path, settings: &LauncherSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }
    let content = toml::to_string_pretty(settings).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(path, content).map_err(|e| AppError::config(e.to_string()))
}

/// Load settings from the launcher data directory.
pub fn load_settings() -> Result<LauncherSettings> {
    ensure_data_dir()?;
    load_settings_from(&settings_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings, LauncherSettings::default());
        assert!(path.exists());
    }

    #[test]
    fn partial_file_falls_back_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "engine = \"podman\"\nreadiness_attempts = 5\n").unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.engine, "podman");
        assert_eq!(settings.readiness_attempts, 5);
        assert_eq!(settings.cache_image, "redis:7-alpine");
        assert_eq!(settings.app_flags.len(), 3);
    }

    #[test]
    fn saved_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let settings = LauncherSettings {
            debug_tools_url: "https://example.invalid/vsdbg.zip".to_string(),
            ..LauncherSettings::default()
        };
        save_settings_to(&path, &settings).unwrap();
        assert_eq!(load_settings_from(&path).unwrap(), settings);
    }
}
