//! # Sources
//!
//! Source address references used by the stack and config sections.

use serde::{Deserialize, Serialize};

/// A git source address plus flags
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SrcOpts {
    /// `[git::]<scheme>://[user@]host[:port]/path[//subdir...][?ref=X]`
    pub address: String,
    /// Flags; `is-file` means the subdirectories are file paths
    #[serde(default)]
    pub extras: Vec<String>,
}

impl SrcOpts {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            extras: Vec::new(),
        }
    }

    pub fn has_extra(&self, flag: &str) -> bool {
        self.extras.iter().any(|e| e == flag)
    }
}
