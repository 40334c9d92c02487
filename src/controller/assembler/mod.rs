//! # Config Assembler
//!
//! Turns the fetched config sources of a run into the data of its tfvars
//! ConfigMap:
//!
//! - `tfvars`: every source's variable files, concatenated in source order,
//!   plus `TF_VAR_*` overrides, merged into one deduplicated file
//! - other files from the sources, later sources replacing earlier ones
//! - `backend_override.tf` and `prerun.sh` from the run's config

pub mod collect;
pub mod export;
pub mod merge;

pub use collect::{collect_source_files, CollectError, SourceFiles};
pub use export::{backend_conf, export_config};
pub use merge::{env_override_lines, merge_tfvars, ConfigMergeError};

use std::collections::BTreeMap;
use thiserror::Error;

/// ConfigMap key of the merged variable file
pub const TFVARS_KEY: &str = "tfvars";
pub const BACKEND_OVERRIDE_KEY: &str = "backend_override.tf";
pub const PRERUN_SCRIPT_KEY: &str = "prerun.sh";

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Merge(#[from] ConfigMergeError),
    #[error(transparent)]
    Collect(#[from] CollectError),
}

/// Result of assembling a run's configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledConfig {
    /// Merged variable file
    pub tfvars: String,
    /// Full ConfigMap data, `tfvars` included
    pub data: BTreeMap<String, String>,
}

/// Merge collected sources and environment overrides
pub fn assemble_config<'a, I>(
    sources: &[SourceFiles],
    env: I,
    custom_backend: Option<&str>,
    prerun_script: Option<&str>,
) -> Result<AssembledConfig, AssemblyError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut combined = String::new();
    let mut data = BTreeMap::new();
    for source in sources {
        combined.push_str(&source.tfvars);
        data.extend(source.files.clone());
    }
    combined.push_str(&env_override_lines(env));

    let tfvars = merge_tfvars(&combined)?;
    data.insert(TFVARS_KEY.to_string(), tfvars.clone());

    if let Some(backend) = custom_backend.filter(|b| !b.is_empty()) {
        data.insert(BACKEND_OVERRIDE_KEY.to_string(), backend.to_string());
    }
    if let Some(script) = prerun_script.filter(|s| !s.is_empty()) {
        data.insert(PRERUN_SCRIPT_KEY.to_string(), script.to_string());
    }

    Ok(AssembledConfig { tfvars, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(tfvars: &str, files: &[(&str, &str)]) -> SourceFiles {
        SourceFiles {
            tfvars: tfvars.to_string(),
            files: files
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_later_source_and_env_override_win() {
        let assembled = assemble_config(
            &[
                source("region = \"a\"\nsize = 1\n", &[("common.json", "first")]),
                source("region = \"b\"\n", &[("common.json", "second")]),
            ],
            [("TF_VAR_size", "3")],
            Some("terraform {}"),
            None,
        )
        .unwrap();

        assert_eq!(assembled.tfvars, "region = \"b\"\n\nsize = \"3\"\n\n");
        assert_eq!(assembled.data["common.json"], "second");
        assert_eq!(assembled.data[TFVARS_KEY], assembled.tfvars);
        assert_eq!(assembled.data[BACKEND_OVERRIDE_KEY], "terraform {}");
        assert!(!assembled.data.contains_key(PRERUN_SCRIPT_KEY));
    }

    #[test]
    fn test_reserved_keys_override_source_files() {
        let assembled = assemble_config(
            &[source("", &[("tfvars", "raw"), ("prerun.sh", "old")])],
            std::iter::empty(),
            None,
            Some("echo hi"),
        )
        .unwrap();
        assert_eq!(assembled.data[TFVARS_KEY], "");
        assert_eq!(assembled.data[PRERUN_SCRIPT_KEY], "echo hi");
    }

    #[test]
    fn test_merge_error_propagates() {
        let err = assemble_config(&[source("oops\n", &[])], std::iter::empty(), None, None)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Merge(_)));
    }
}
