//! Unpacking of source/target archives into scratch directories.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use treecmp_common::TreeCmpError;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Detect by file name; case-insensitive
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

pub fn is_archive(path: &Path) -> bool {
    path.is_file() && ArchiveKind::from_path(path).is_some()
}

fn archive_error(archive: &Path, e: impl std::fmt::Display) -> TreeCmpError {
    TreeCmpError::Archive(format!("Failed to read {}: {}", archive.display(), e))
}

/// Resolve an entry name below `dest`, rejecting anything that could escape it
fn contained_path(dest: &Path, name: &str, entry: &Path) -> Result<PathBuf, TreeCmpError> {
    let mut out = dest.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TreeCmpError::Archive(format!(
                    "Entry is outside of the target dir: {}",
                    name
                )))
            }
        }
    }
    Ok(out)
}

fn write_entry(reader: &mut impl Read, path: &Path) -> Result<(), TreeCmpError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(path)?;
    io::copy(reader, &mut out)?;
    Ok(())
}

/// Extract `archive` into `dest`, returning the number of files written.
///
/// `dest` is emptied first. One entry resolving outside `dest` fails the
/// whole extraction. Links are skipped.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, TreeCmpError> {
    let kind = ArchiveKind::from_path(archive).ok_or_else(|| {
        TreeCmpError::Archive(format!("Unsupported archive format: {}", archive.display()))
    })?;

    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let file = File::open(archive)?;
    let count = match kind {
        ArchiveKind::Zip => extract_zip(archive, file, dest)?,
        ArchiveKind::Tar => extract_tar(archive, file, dest)?,
        ArchiveKind::TarGz => extract_tar(archive, GzDecoder::new(file), dest)?,
    };

    info!("Extracted {} files from {:?} into {:?}", count, archive, dest);
    Ok(count)
}

fn extract_zip(archive_path: &Path, file: File, dest: &Path) -> Result<usize, TreeCmpError> {
    let mut archive = ZipArchive::new(file).map_err(|e| archive_error(archive_path, e))?;
    let mut count = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_error(archive_path, e))?;
        let name = entry.name().to_string();
        let target = contained_path(dest, &name, Path::new(&name))?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if entry
            .unix_mode()
            .map_or(false, |mode| mode & 0o170000 == 0o120000)
        {
            debug!("Skipping symlink entry {}", name);
            continue;
        }

        write_entry(&mut entry, &target)?;
        count += 1;
    }

    Ok(count)
}

fn extract_tar<R: Read>(archive_path: &Path, reader: R, dest: &Path) -> Result<usize, TreeCmpError> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;

    for entry in archive.entries().map_err(|e| archive_error(archive_path, e))? {
        let mut entry = entry.map_err(|e| archive_error(archive_path, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| archive_error(archive_path, e))?
            .into_owned();
        let name = entry_path.to_string_lossy().into_owned();
        let target = contained_path(dest, &name, &entry_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry_type.is_file() {
            write_entry(&mut entry, &target)?;
            count += 1;
        } else {
            debug!("Skipping {:?} entry {}", entry_type, name);
        }
    }

    Ok(count)
}
