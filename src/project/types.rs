//! Project configuration records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Shape shared by every service of the stack.
pub trait ServiceConfig {
    /// Human-readable service label used in messages.
    fn label(&self) -> &str;
    fn container_name(&self) -> &str;
    fn port(&self) -> u16;
    fn volume_path(&self) -> &Path;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_name: String,
    #[serde(default, deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_path: PathBuf,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminUiConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_name: String,
    #[serde(default, deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_name: String,
    #[serde(default, deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_name: String,
    #[serde(default, deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "loose_port")]
    pub management_port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_path: PathBuf,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub password: String,
}

/// One deployed application container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_name: String,
    #[serde(default, deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "null_as_default")]
    pub volume_path: PathBuf,
    #[serde(default, deserialize_with = "null_as_default")]
    pub app_path: PathBuf,
    #[serde(default, deserialize_with = "null_as_default")]
    pub backup_path: PathBuf,
    /// Logical cache database the instance uses.
    #[serde(default, deserialize_with = "loose_index")]
    pub cache_index: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub db_engine_tag: String,
    /// Tag of the application runtime base image.
    #[serde(default, deserialize_with = "null_as_default")]
    pub runtime_tag: String,
    /// Last successful start. `None` means the database was never restored.
    #[serde(default, deserialize_with = "loose_timestamp")]
    pub launched_at: Option<DateTime<Utc>>,
}

impl InstanceConfig {
    pub fn is_launched(&self) -> bool {
        self.launched_at.is_some()
    }

    /// Name of the database restored from this instance's backup.
    pub fn database_name(&self) -> String {
        format!("{}_db", slug(&self.container_name).replace('-', "_"))
    }

    pub fn backup_file_name(&self) -> Option<String> {
        self.backup_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }
}

macro_rules! impl_service_config {
    ($ty:ty, $label:expr) => {
        impl ServiceConfig for $ty {
            fn label(&self) -> &str {
                $label
            }

            fn container_name(&self) -> &str {
                &self.container_name
            }

            fn port(&self) -> u16 {
                self.port
            }

            fn volume_path(&self) -> &Path {
                &self.volume_path
            }
        }
    };
}

impl_service_config!(DatabaseConfig, "Database");
impl_service_config!(AdminUiConfig, "Admin UI");
impl_service_config!(CacheConfig, "Cache");
impl_service_config!(BrokerConfig, "Broker");
impl_service_config!(InstanceConfig, "Instance");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfiguration {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub root_path: PathBuf,
    #[serde(default = "chrono::Utc::now")]
    pub modified_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "loose_timestamp")]
    pub last_built_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "loose_timestamp")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub database: DatabaseConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub admin_ui: AdminUiConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cache: CacheConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub broker: BrokerConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instances: Vec<InstanceConfig>,
}

impl ProjectConfiguration {
    /// Fresh project with default service names, ports and volume locations.
    /// Instances are added by the user afterwards.
    pub fn new(name: &str, root_path: &Path) -> Self {
        let prefix = slug(name);
        let data = root_path.join("data");
        Self {
            name: name.to_string(),
            root_path: root_path.to_path_buf(),
            modified_at: Utc::now(),
            last_built_at: None,
            last_run_at: None,
            database: DatabaseConfig {
                container_name: format!("{prefix}-db"),
                port: 1433,
                volume_path: data.join("db"),
                user: "sa".to_string(),
                password: String::new(),
            },
            admin_ui: AdminUiConfig {
                container_name: format!("{prefix}-admin"),
                port: 8080,
                volume_path: data.join("admin"),
            },
            cache: CacheConfig {
                container_name: format!("{prefix}-cache"),
                port: 6379,
                volume_path: data.join("cache"),
            },
            broker: BrokerConfig {
                container_name: format!("{prefix}-broker"),
                port: 5672,
                management_port: 15672,
                volume_path: data.join("broker"),
                user: "guest".to_string(),
                password: "guest".to_string(),
            },
            instances: Vec::new(),
        }
    }

    /// Name of the isolated engine network the stack runs in.
    pub fn network_name(&self) -> String {
        format!("{}_net", slug(&self.name))
    }

    pub fn instance(&self, container_name: &str) -> Option<&InstanceConfig> {
        self.instances
            .iter()
            .find(|i| i.container_name == container_name)
    }

    pub fn instance_mut(&mut self, container_name: &str) -> Option<&mut InstanceConfig> {
        self.instances
            .iter_mut()
            .find(|i| i.container_name == container_name)
    }

    /// Container names of every service, fixed services first.
    pub fn container_names(&self) -> Vec<&str> {
        let mut names = vec![
            self.database.container_name.as_str(),
            self.admin_ui.container_name.as_str(),
            self.cache.container_name.as_str(),
            self.broker.container_name.as_str(),
        ];
        names.extend(self.instances.iter().map(|i| i.container_name.as_str()));
        names
    }
}

/// Lowercase, filesystem and engine safe identifier.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if matches!(c, '-' | '_') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(&['-', '_'][..]);
    if trimmed.is_empty() {
        "stack".to_string()
    } else {
        trimmed.to_string()
    }
}

// Hand-edited documents may carry `null` or `""` where a value is absent.
// Those load as empty so that validation can report them.

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(u64),
    Text(String),
}

fn loose_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<LooseNumber>::deserialize(deserializer)? {
        None => Ok(None),
        Some(LooseNumber::Number(n)) => Ok(Some(n)),
        Some(LooseNumber::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("invalid number: {text:?}")))
        }
    }
}

fn loose_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match loose_number(deserializer)? {
        None => Ok(0),
        Some(n) => u16::try_from(n).map_err(|_| de::Error::custom(format!("port out of range: {n}"))),
    }
}

fn loose_index<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    loose_number(deserializer)?
        .map(|n| u32::try_from(n).map_err(|_| de::Error::custom(format!("index out of range: {n}"))))
        .transpose()
}

fn loose_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(text) if !text.trim().is_empty() => text
            .trim()
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(de::Error::custom),
        _ => Ok(None),
    }
}
