//! Archive extraction for downloaded tooling (zip and tar.gz).
//!
//! A single top-level directory shared by every entry is stripped. Entries
//! that would land outside the destination abort the extraction; link entries
//! are skipped.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format from a file name or URL.
    pub fn detect(name: &str) -> Option<Self> {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

pub fn extract_archive(format: ArchiveFormat, archive_path: &Path, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir)?;
    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
        ArchiveFormat::TarGz => extract_tar_gz(archive_path, dest_dir),
    }
}

/// Relative entry path with `.` removed, or `None` for absolute or traversing paths.
fn safe_relative(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    let bytes = normalized.as_bytes();
    if normalized.starts_with('/') || (bytes.len() >= 2 && bytes[1] == b':') {
        return None;
    }
    let mut out = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => out.push(part),
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// The first component when every entry lives below it.
fn common_top_dir(paths: &[PathBuf]) -> Option<OsString> {
    let mut top: Option<OsString> = None;
    let mut nested = false;
    for path in paths {
        let mut components = path.components();
        let Some(Component::Normal(first)) = components.next() else {
            return None;
        };
        match &top {
            Some(existing) if existing != first => return None,
            Some(_) => {}
            None => top = Some(first.to_os_string()),
        }
        nested |= components.next().is_some();
    }
    top.filter(|_| nested)
}

fn strip_top(path: &Path, top: Option<&OsString>) -> Option<PathBuf> {
    let Some(top) = top else {
        return Some(path.to_path_buf());
    };
    let stripped = path.strip_prefix(top).ok()?;
    (!stripped.as_os_str().is_empty()).then(|| stripped.to_path_buf())
}

fn write_file<R: io::Read>(out_path: &Path, reader: &mut R, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(out_path)?;
    io::copy(reader, &mut file)?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(out_path, fs::Permissions::from_mode(mode & 0o777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn unsafe_entry(raw: &str) -> AppError {
    AppError::archive(format!("archive contains unsafe entry path: {raw:?}"))
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(fs::File::open(archive_path)?)?;

    let mut names = Vec::with_capacity(archive.len());
    for raw in archive.file_names() {
        names.push(safe_relative(raw).ok_or_else(|| unsafe_entry(raw))?);
    }
    let top = common_top_dir(&names);

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw = entry.name().to_string();
        let relative = safe_relative(&raw).ok_or_else(|| unsafe_entry(&raw))?;
        let Some(relative) = strip_top(&relative, top.as_ref()) else {
            continue;
        };
        let out_path = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else if entry.is_symlink() {
            log::warn!("Skipping symlink entry {:?}", raw);
        } else {
            let mode = entry.unix_mode();
            write_file(&out_path, &mut entry, mode)?;
        }
    }
    Ok(())
}

fn open_tar_gz(archive_path: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}

fn tar_entry_path<R: io::Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry
        .path()
        .map_err(|e| AppError::archive(e.to_string()))?;
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::archive(format!("entry path is not valid UTF-8: {path:?}")))
}

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    // First pass: entry names only.
    let mut names = Vec::new();
    let mut archive = open_tar_gz(archive_path)?;
    for entry in archive
        .entries()
        .map_err(|e| AppError::archive(e.to_string()))?
    {
        let entry = entry.map_err(|e| AppError::archive(e.to_string()))?;
        let raw = tar_entry_path(&entry)?;
        names.push(safe_relative(&raw).ok_or_else(|| unsafe_entry(&raw))?);
    }
    let top = common_top_dir(&names);

    let mut archive = open_tar_gz(archive_path)?;
    for entry in archive
        .entries()
        .map_err(|e| AppError::archive(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| AppError::archive(e.to_string()))?;
        let raw = tar_entry_path(&entry)?;
        let relative = safe_relative(&raw).ok_or_else(|| unsafe_entry(&raw))?;
        let Some(relative) = strip_top(&relative, top.as_ref()) else {
            continue;
        };
        let out_path = dest_dir.join(relative);

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else if entry_type.is_file() {
            let mode = entry.header().mode().ok();
            write_file(&out_path, &mut entry, mode)?;
        } else {
            log::warn!("Skipping {:?} entry {:?}", entry_type, raw);
        }
    }
    Ok(())
}
