//! # Module Upload
//!
//! Archives a fetched module into a tarball small enough for a ConfigMap.

use crate::constants::MAX_MODULE_ARCHIVE_BYTES;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// ConfigMap key holding the archive
pub const MODULE_ARCHIVE_KEY: &str = "module.tar";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("module archive is {size} bytes, larger than the {limit} byte ConfigMap limit")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to archive module: {0}")]
    Io(#[from] std::io::Error),
}

/// Tar `module_dir` (without `.git`) into memory
pub fn archive_module(module_dir: &Path) -> Result<Vec<u8>, UploadError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let walker = WalkDir::new(module_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(module_dir)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), relative)?;
        }
    }

    let archive = builder.into_inner()?;
    if archive.len() > MAX_MODULE_ARCHIVE_BYTES {
        return Err(UploadError::TooLarge {
            size: archive.len(),
            limit: MAX_MODULE_ARCHIVE_BYTES,
        });
    }
    Ok(archive)
}
