//! # Terraform Spec
//!
//! Main CRD specification types and default values.

use serde::{Deserialize, Serialize};

/// Terraform Custom Resource Definition
///
/// Declares a Terraform stack to run from a git source, the variable sources
/// to feed it, and how to reach the repositories involved.
///
/// # Example
///
/// ```yaml
/// apiVersion: tf.tfops.io/v1alpha1
/// kind: Terraform
/// metadata:
///   name: demo
///   namespace: default
/// spec:
///   stack:
///     source:
///       address: git::https://github.com/example/stacks.git//network?ref=v1.2.0
///     terraformVersion: 0.12.29
///   config:
///     sources:
///       - address: https://github.com/example/tfvars.git//dev
///     env:
///       - name: TF_VAR_region
///         value: us-east-1
///     applyOnCreate: true
///     applyOnUpdate: true
///   scmAuthMethods:
///     - host: github.com
///       git:
///         https:
///           tokenSecretRef:
///             name: github-token
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Terraform",
    group = "tf.tfops.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::TerraformStatus",
    shortname = "tf",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Generation", "type":"integer", "jsonPath":".status.lastObservedGeneration"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TerraformSpec {
    /// The Terraform module to run
    pub stack: StackSpec,
    /// Variable sources, environment and run policy
    #[serde(default)]
    pub config: ConfigSpec,
    /// Per-host git authentication; the first entry matching a host wins
    #[serde(default)]
    pub scm_auth_methods: Vec<crate::crd::ScmAuthMethod>,
    /// SSH bastion used to reach git hosts on a private network
    #[serde(default, alias = "sshProxy")]
    pub ssh_tunnel: Option<crate::crd::SshTunnel>,
}

/// The Terraform module and the tool version to run it with
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    /// Location of the module
    pub source: crate::crd::SrcOpts,
    /// Terraform version; selects the runner image tag
    #[serde(default)]
    pub terraform_version: Option<String>,
    /// Ship the fetched module to the job in a ConfigMap instead of letting
    /// the runner clone it
    #[serde(default = "default_false")]
    pub upload_module: bool,
}

/// Run configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Repositories holding `*.tfvars` and other configuration files, in merge order
    #[serde(default)]
    pub sources: Vec<crate::crd::SrcOpts>,
    /// Environment for the runner; `TF_VAR_` entries also override variables
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Cloud credentials selector
    ///
    /// Contains `kiam`: used as the pod's IAM role annotation.
    /// Contains `irsa`: the role ARN is set on the service account.
    /// Anything else names a secret loaded into the runner with `envFrom`.
    #[serde(default)]
    pub cloud_profile: Option<String>,
    /// Apply (rather than plan only) when the run is first created
    #[serde(default = "default_false")]
    pub apply_on_create: bool,
    /// Apply (rather than plan only) when the run's spec changes
    #[serde(default = "default_false")]
    pub apply_on_update: bool,
    /// Apply the destroy plan when the run is deleted
    #[serde(default = "default_false")]
    pub apply_on_delete: bool,
    /// Skip the destroy job on deletion and only release the finalizer
    #[serde(default = "default_false")]
    pub ignore_delete: bool,
    /// Terraform backend block, shipped as `backend_override.tf`
    #[serde(default)]
    pub custom_backend: Option<String>,
    /// Script the runner executes before Terraform, shipped as `prerun.sh`
    #[serde(default)]
    pub prerun_script: Option<String>,
    /// Repository that receives a copy of the merged variable file
    #[serde(default)]
    pub export_repo: Option<ExportRepo>,
}

/// Plain name/value environment entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Export target for the merged variable file
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportRepo {
    /// Repository address; `ref=` selects the branch to push to
    pub address: String,
    /// Path in the repository of the merged variable file
    pub tfvars_file: String,
    /// Path in the repository of the backend settings extracted from `customBackend`
    #[serde(default)]
    pub conf_file: Option<String>,
}

/// Default value for boolean flags that are off unless set
pub fn default_false() -> bool {
    false
}

impl Terraform {
    /// Name of the run; empty only for objects that never came from the API server
    pub fn run_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn run_namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
