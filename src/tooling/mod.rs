//! Remote debugger provisioning.
//!
//! The debugger archive is fetched once per project into `.tools/vsdbg` and
//! copied from there into each instance volume after the instance starts.

mod archive;
mod download;

use std::fs;
use std::path::{Path, PathBuf};

use reqwest::Client;
use walkdir::WalkDir;

use crate::error::{AppError, Result};
use crate::paths::{debug_tools_dir, DEBUGGER_DIR, TOOLS_DIR};
use crate::settings::LauncherSettings;

use archive::{extract_archive, ArchiveFormat};
use download::download_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// No download URL configured.
    Disabled,
    AlreadyPresent,
    Installed,
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

/// Download and unpack the debugger into the project tooling directory unless
/// it is already there.
pub async fn provision_debug_tools(
    client: &Client,
    settings: &LauncherSettings,
    root: &Path,
) -> Result<ProvisionOutcome> {
    let url = settings.debug_tools_url.trim();
    if url.is_empty() {
        return Ok(ProvisionOutcome::Disabled);
    }

    let target = debug_tools_dir(root);
    if has_entries(&target) {
        return Ok(ProvisionOutcome::AlreadyPresent);
    }

    let format = ArchiveFormat::detect(url).ok_or_else(|| {
        AppError::archive(format!("Unsupported debugger archive format: {url}"))
    })?;
    let tools = root.join(TOOLS_DIR);
    let archive_path = tools.join(match format {
        ArchiveFormat::Zip => "vsdbg.download.zip",
        ArchiveFormat::TarGz => "vsdbg.download.tar.gz",
    });
    let staging = tools.join(format!("{DEBUGGER_DIR}.partial"));

    download_file(client, url, &archive_path).await?;

    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let (archive_for_task, staging_for_task) = (archive_path.clone(), staging.clone());
    tokio::task::spawn_blocking(move || {
        extract_archive(format, &archive_for_task, &staging_for_task)
    })
    .await
    .map_err(|e| AppError::other(format!("Extraction task failed: {e}")))??;

    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::rename(&staging, &target)?;
    if let Err(e) = fs::remove_file(&archive_path) {
        log::warn!("Failed to remove {:?}: {}", archive_path, e);
    }

    log::info!("Debugger installed into {}", target.display());
    Ok(ProvisionOutcome::Installed)
}

/// Copy the project's debugger into `<volume>/vsdbg` when the volume has none.
/// Returns the directory when something was copied.
pub fn install_into_volume(root: &Path, volume: &Path) -> Result<Option<PathBuf>> {
    let source = debug_tools_dir(root);
    let target = volume.join(DEBUGGER_DIR);
    if !has_entries(&source) || target.exists() {
        return Ok(None);
    }

    for entry in WalkDir::new(&source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(&source)
            .map_err(|e| AppError::io(e.to_string()))?;
        let out = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&out)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &out)?;
        }
    }

    Ok(Some(target))
}
