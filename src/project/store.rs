//! Project document persistence.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;

use super::types::ProjectConfiguration;
use crate::error::{AppError, Result};
use crate::paths::project_file;

/// Durable storage of project documents, keyed by project root.
pub trait ProjectStore: Send + Sync {
    fn exists(&self, root: &Path) -> bool;

    fn load(&self, root: &Path) -> Result<ProjectConfiguration>;

    /// Write the whole document, replacing whatever is on disk.
    fn save(&self, config: &ProjectConfiguration) -> Result<()>;

    /// Re-read the document, apply `f` and write it back while holding the
    /// store lock, so that unrelated fields edited elsewhere are kept.
    fn update(
        &self,
        root: &Path,
        f: &mut dyn FnMut(&mut ProjectConfiguration) -> Result<()>,
    ) -> Result<ProjectConfiguration>;
}

/// Stores each project as pretty-printed JSON in `stack-project.json`.
#[derive(Default)]
pub struct JsonProjectStore {
    lock: Mutex<()>,
}

impl JsonProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the project document for `root` unless one already exists.
    pub fn init(&self, root: &Path, name: &str) -> Result<ProjectConfiguration> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = project_file(root);
        if path.exists() {
            return read_document(root);
        }
        fs::create_dir_all(root)
            .map_err(|e| AppError::io(format!("Failed to create project dir: {}", e)))?;
        let config = ProjectConfiguration::new(name, root);
        write_document(&config)?;
        log::info!("Initialized project {} at {:?}", name, root);
        Ok(config)
    }
}

fn read_document(root: &Path) -> Result<ProjectConfiguration> {
    let path = project_file(root);
    if !path.exists() {
        return Err(AppError::config(format!(
            "Project document not found: {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(&path)
        .map_err(|e| AppError::io(format!("Failed to read {}: {}", path.display(), e)))?;
    let content = content.trim_start_matches('\u{feff}');
    let mut config: ProjectConfiguration = serde_json::from_str(content)
        .map_err(|e| AppError::config(format!("Failed to parse {}: {}", path.display(), e)))?;
    if config.root_path.as_os_str().is_empty() {
        config.root_path = root.to_path_buf();
    }
    Ok(config)
}

fn write_document(config: &ProjectConfiguration) -> Result<()> {
    let path = project_file(&config.root_path);
    let content = serde_json::to_string_pretty(config)?;
    fs::write(&path, content)
        .map_err(|e| AppError::io(format!("Failed to write {}: {}", path.display(), e)))
}

impl ProjectStore for JsonProjectStore {
    fn exists(&self, root: &Path) -> bool {
        project_file(root).is_file()
    }

    fn load(&self, root: &Path) -> Result<ProjectConfiguration> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        read_document(root)
    }

    fn save(&self, config: &ProjectConfiguration) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        write_document(config)
    }

    fn update(
        &self,
        root: &Path,
        f: &mut dyn FnMut(&mut ProjectConfiguration) -> Result<()>,
    ) -> Result<ProjectConfiguration> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = read_document(root)?;
        f(&mut config)?;
        config.modified_at = Utc::now();
        write_document(&config)?;
        Ok(config)
    }
}

/// Fold the user-editable sections of `edits` into the persisted `doc`.
///
/// Build and run timestamps are owned by the pipeline and stay as persisted.
/// An instance keeps the most recent `launched_at` of the two sides.
pub fn merge_edits(doc: &mut ProjectConfiguration, edits: &ProjectConfiguration) {
    doc.name = edits.name.clone();
    if doc.root_path.as_os_str().is_empty() {
        doc.root_path = edits.root_path.clone();
    }
    doc.database = edits.database.clone();
    doc.admin_ui = edits.admin_ui.clone();
    doc.cache = edits.cache.clone();
    doc.broker = edits.broker.clone();

    let instances = edits
        .instances
        .iter()
        .map(|edited| {
            let mut merged = edited.clone();
            if let Some(persisted) = doc.instance(&edited.container_name) {
                merged.launched_at = match (persisted.launched_at, edited.launched_at) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
            merged
        })
        .collect();
    doc.instances = instances;
}
