//! # Config File Collection
//!
//! Reads the files a config source contributes from its working copy.
//!
//! - `is-file` sources: the subdirectory entries are file paths
//! - sources with subdirectories: files directly under each subdirectory
//! - otherwise: files directly under the repository root
//!
//! Only `*.tfvars` files feed the variable merge and they must be UTF-8. Every
//! other text file with a valid ConfigMap key is also shipped to the runner
//! as-is; files that are not UTF-8 are skipped with a warning.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

static CONFIGMAP_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-._a-zA-Z0-9]+$")
        .expect("Failed to compile CONFIGMAP_KEY_PATTERN - this should never happen")
});

#[derive(Debug, Error)]
#[error("failed to read config source path {}: {source}", path.display())]
pub struct CollectError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl CollectError {
    fn new(path: &Path, source: std::io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What one config source contributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFiles {
    /// Contents of every variable file, each followed by a newline
    pub tfvars: String,
    /// File name to content for every shippable file
    pub files: BTreeMap<String, String>,
}

/// Collect the files of one fetched config source
pub fn collect_source_files(
    root: &Path,
    subdirs: &[String],
    is_file: bool,
) -> Result<SourceFiles, CollectError> {
    let paths = if is_file {
        subdirs.iter().map(|f| root.join(f)).collect()
    } else if subdirs.is_empty() {
        list_dir(root)?
    } else {
        let mut all = Vec::new();
        for subdir in subdirs {
            all.extend(list_dir(&root.join(subdir))?);
        }
        all
    };

    let mut collected = SourceFiles::default();
    for path in paths {
        let bytes = std::fs::read(&path).map_err(|source| CollectError::new(&path, source))?;
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(e) if is_tfvars(name) => {
                return Err(CollectError::new(
                    &path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error()),
                ));
            }
            Err(_) => {
                warn!(file = %path.display(), "Skipping file that is not valid UTF-8");
                continue;
            }
        };

        if is_tfvars(name) {
            debug!(file = %path.display(), "Collected variable file");
            collected.tfvars.push_str(&content);
            collected.tfvars.push('\n');
        }
        if CONFIGMAP_KEY_PATTERN.is_match(name) {
            collected.files.insert(name.to_string(), content);
        } else {
            warn!(file = %path.display(), "Skipping file whose name is not a valid ConfigMap key");
        }
    }
    Ok(collected)
}

fn is_tfvars(name: &str) -> bool {
    name.ends_with(".tfvars")
}

/// Regular files directly under `dir`, sorted by name
fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, CollectError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| CollectError::new(dir, e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
