//! # Run Context
//!
//! Per-pass description of one execution: names, flags and the inputs the
//! pipeline gathers before objects are generated. Built fresh for every pass
//! and never persisted.

use crate::constants::{DESTROY_SUFFIX, SERVICE_ACCOUNT_PREFIX};
use crate::controller::source::ResolvedSecretRef;
use crate::crd::Terraform;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::collections::BTreeMap;

/// Where the runner gets the module from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Runner clones `repo` at `commit` itself
    Remote {
        repo: String,
        commit: String,
        subdir: Option<String>,
    },
    /// Module shipped in ConfigMaps, mounted under `/tfops/<name>`
    Uploaded {
        config_maps: Vec<String>,
        commit: String,
    },
}

impl ModuleSource {
    pub fn commit(&self) -> &str {
        match self {
            ModuleSource::Remote { commit, .. } | ModuleSource::Uploaded { commit, .. } => commit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    /// Name of generated objects: the run name, or `<run>-destroy`
    pub name: String,
    /// Name of the `Terraform` resource itself
    pub run_name: String,
    pub namespace: String,
    pub service_account: String,
    pub generation: i64,
    pub is_destroy: bool,
    pub is_new_resource: bool,
    /// Apply rather than plan only
    pub apply_action: bool,
    /// Runner environment; last write wins
    pub env: BTreeMap<String, String>,
    pub terraform_version: Option<String>,
    pub cloud_profile: Option<String>,
    /// Controller owner reference to the run; `None` for objects without a uid
    pub owner: Option<OwnerReference>,

    pub module: Option<ModuleSource>,
    pub tfvars_config_map: Option<String>,
    /// Token secret exposed to the runner as `GIT_PASSWORD`
    pub token_secret: Option<ResolvedSecretRef>,
    /// Contents of the runner's `~/.ssh`; empty when no ssh access is configured
    pub ssh_config: BTreeMap<String, String>,
}

impl RunContext {
    pub fn new(run: &Terraform, is_destroy: bool) -> Self {
        let config = &run.spec.config;
        let run_name = run.run_name().to_string();
        let generation = run.generation();

        let (name, is_new_resource, apply_action) = if is_destroy {
            (format!("{run_name}{DESTROY_SUFFIX}"), false, config.apply_on_delete)
        } else if generation > 1 {
            (run_name.clone(), false, config.apply_on_update)
        } else {
            (run_name.clone(), true, config.apply_on_create)
        };

        let mut env = BTreeMap::new();
        env.insert("DEPLOYMENT".to_string(), run_name.clone());
        for var in &config.env {
            env.insert(var.name.clone(), var.value.clone());
        }
        if is_destroy {
            env.insert("DESTROY".to_string(), "true".to_string());
        }

        Self {
            service_account: format!("{SERVICE_ACCOUNT_PREFIX}{name}"),
            name,
            run_name,
            namespace: run.run_namespace().to_string(),
            generation,
            is_destroy,
            is_new_resource,
            apply_action,
            env,
            terraform_version: run
                .spec
                .stack
                .terraform_version
                .clone()
                .filter(|v| !v.is_empty()),
            cloud_profile: config.cloud_profile.clone().filter(|p| !p.is_empty()),
            owner: run.controller_owner_ref(&()),
            module: None,
            tfvars_config_map: None,
            token_secret: None,
            ssh_config: BTreeMap::new(),
        }
    }

    /// `action` value of the action ConfigMap
    pub fn action(&self) -> &'static str {
        if self.apply_action {
            "apply"
        } else {
            "plan-only"
        }
    }

    pub fn action_config_map_name(&self) -> String {
        format!("{}-action", self.name)
    }

    pub fn tfvars_config_map_name(&self) -> String {
        format!("{}-tfvars", self.name)
    }

    pub fn module_config_map_name(&self) -> String {
        format!("{}-module", self.name)
    }

    pub fn ssh_secret_name(&self) -> String {
        format!("{}-ssh-config", self.name)
    }

    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConfigSpec, EnvVar, SrcOpts, StackSpec, TerraformSpec};

    fn run(generation: i64, config: ConfigSpec) -> Terraform {
        let mut run = Terraform::new(
            "demo",
            TerraformSpec {
                stack: StackSpec {
                    source: SrcOpts::new("https://github.com/org/stack.git"),
                    terraform_version: None,
                    upload_module: false,
                },
                config,
                scm_auth_methods: vec![],
                ssh_tunnel: None,
            },
        );
        run.metadata.namespace = Some("team".to_string());
        run.metadata.generation = Some(generation);
        run.metadata.uid = Some("uid-1".to_string());
        run
    }

    #[test]
    fn test_first_generation_is_new_and_uses_create_policy() {
        let ctx = RunContext::new(
            &run(
                1,
                ConfigSpec {
                    apply_on_create: true,
                    ..Default::default()
                },
            ),
            false,
        );
        assert_eq!(ctx.name, "demo");
        assert_eq!(ctx.service_account, "tf-demo");
        assert!(ctx.is_new_resource);
        assert_eq!(ctx.action(), "apply");
        assert_eq!(ctx.env["DEPLOYMENT"], "demo");
        assert!(!ctx.env.contains_key("DESTROY"));
        assert_eq!(ctx.owner.as_ref().map(|o| o.uid.as_str()), Some("uid-1"));
    }

    #[test]
    fn test_update_uses_update_policy() {
        let ctx = RunContext::new(
            &run(
                3,
                ConfigSpec {
                    apply_on_create: true,
                    apply_on_update: false,
                    ..Default::default()
                },
            ),
            false,
        );
        assert!(!ctx.is_new_resource);
        assert_eq!(ctx.action(), "plan-only");
    }

    #[test]
    fn test_destroy_context() {
        let ctx = RunContext::new(
            &run(
                1,
                ConfigSpec {
                    apply_on_create: true,
                    apply_on_delete: false,
                    env: vec![EnvVar {
                        name: "TF_VAR_region".to_string(),
                        value: "us-east-1".to_string(),
                    }],
                    ..Default::default()
                },
            ),
            true,
        );
        assert_eq!(ctx.name, "demo-destroy");
        assert_eq!(ctx.run_name, "demo");
        assert_eq!(ctx.service_account, "tf-demo-destroy");
        assert!(!ctx.is_new_resource);
        assert_eq!(ctx.action(), "plan-only");
        assert_eq!(ctx.env["DESTROY"], "true");
        assert_eq!(ctx.env["TF_VAR_region"], "us-east-1");
        assert_eq!(ctx.action_config_map_name(), "demo-destroy-action");
    }
}
