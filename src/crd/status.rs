//! # Terraform Status
//!
//! Status types for tracking the run's job.

use serde::{Deserialize, Serialize};

/// Status of the Terraform resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerraformStatus {
    /// `running` while the job has active pods, `stopped` once it succeeded
    #[serde(default)]
    pub phase: Option<RunPhase>,
    /// Generation the last successful job was built from
    #[serde(default)]
    pub last_observed_generation: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Running,
    Stopped,
}

impl RunPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Running => "running",
            RunPhase::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase_phase() {
        let status = TerraformStatus {
            phase: Some(RunPhase::Stopped),
            last_observed_generation: Some(3),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "stopped");
        assert_eq!(json["lastObservedGeneration"], 3);
    }
}
