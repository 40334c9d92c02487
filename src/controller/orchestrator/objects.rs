//! # Generated Objects
//!
//! Pure builders for the objects one execution needs. Every object carries
//! the controller owner reference to its run so that deleting the run lets
//! the garbage collector reclaim them.

use crate::constants::{GENERATION_ANNOTATION, TFOPS_MOUNT_ROOT, TFVARS_CHECKSUM_ANNOTATION};
use crate::controller::assembler::{AssembledConfig, TFVARS_KEY};
use crate::controller::orchestrator::run_context::{ModuleSource, RunContext};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvFromSource, EnvVar, EnvVarSource, PodSpec,
    PodTemplateSpec, Secret, SecretEnvSource, SecretKeySelector, SecretVolumeSource,
    ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub const RUNNER_CONTAINER: &str = "tf";
pub const SSH_VOLUME: &str = "ssh-key";
pub const SSH_MOUNT_PATH: &str = "/root/.ssh/";
pub const KIAM_ROLE_ANNOTATION: &str = "iam.amazonaws.com/role";
pub const IRSA_ROLE_ANNOTATION: &str = "eks.amazonaws.com/role-arn";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const RUN_LABEL: &str = "tf.tfops.io/run";

static ROLE_ARN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"arn:aws[a-zA-Z-]*:iam::[0-9]{12}:role/[A-Za-z0-9+=,.@_/-]+")
        .expect("Failed to compile ROLE_ARN_PATTERN - this should never happen")
});

/// How the cloud profile string is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudProfile<'a> {
    /// Pod annotation for kiam
    Kiam(&'a str),
    /// Role ARN annotation on the service account
    Irsa(&'a str),
    /// Secret loaded into the runner's environment
    Secret(&'a str),
}

impl<'a> CloudProfile<'a> {
    pub fn parse(profile: &'a str) -> Self {
        if profile.contains("kiam") {
            CloudProfile::Kiam(profile)
        } else if profile.contains("irsa") {
            let arn = ROLE_ARN_PATTERN
                .find(profile)
                .map_or(profile, |m| m.as_str());
            CloudProfile::Irsa(arn)
        } else {
            CloudProfile::Secret(profile)
        }
    }
}

fn metadata(ctx: &RunContext, name: String) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), crate::constants::CONTROLLER_NAME.to_string());
    labels.insert(RUN_LABEL.to_string(), ctx.run_name.clone());
    ObjectMeta {
        name: Some(name),
        namespace: Some(ctx.namespace.clone()),
        labels: Some(labels),
        owner_references: ctx.owner.clone().map(|o| vec![o]),
        ..Default::default()
    }
}

pub fn service_account(ctx: &RunContext) -> ServiceAccount {
    let mut meta = metadata(ctx, ctx.service_account.clone());
    if let Some(CloudProfile::Irsa(arn)) = ctx.cloud_profile.as_deref().map(CloudProfile::parse) {
        meta.annotations = Some(BTreeMap::from([(
            IRSA_ROLE_ANNOTATION.to_string(),
            arn.to_string(),
        )]));
    }
    ServiceAccount {
        metadata: meta,
        ..Default::default()
    }
}

/// Read/write on ConfigMaps only; the runner reports its status through one
pub fn role(ctx: &RunContext) -> Role {
    Role {
        metadata: metadata(ctx, ctx.name.clone()),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["configmaps".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn role_binding(ctx: &RunContext) -> RoleBinding {
    RoleBinding {
        metadata: metadata(ctx, ctx.name.clone()),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: ctx.name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: ctx.service_account.clone(),
            namespace: Some(ctx.namespace.clone()),
            ..Default::default()
        }]),
    }
}

pub fn action_config_map(ctx: &RunContext) -> ConfigMap {
    ConfigMap {
        metadata: metadata(ctx, ctx.action_config_map_name()),
        data: Some(BTreeMap::from([(
            "action".to_string(),
            ctx.action().to_string(),
        )])),
        ..Default::default()
    }
}

pub fn tfvars_config_map(ctx: &RunContext, config: &AssembledConfig) -> ConfigMap {
    let mut meta = metadata(ctx, ctx.tfvars_config_map_name());
    meta.annotations = Some(BTreeMap::from([(
        TFVARS_CHECKSUM_ANNOTATION.to_string(),
        tfvars_checksum(&config.tfvars),
    )]));
    ConfigMap {
        metadata: meta,
        data: Some(config.data.clone()),
        ..Default::default()
    }
}

pub fn tfvars_checksum(tfvars: &str) -> String {
    format!("{:x}", Sha256::digest(tfvars.as_bytes()))
}

pub fn module_config_map(ctx: &RunContext, name: String, key: &str, archive: Vec<u8>) -> ConfigMap {
    ConfigMap {
        metadata: metadata(ctx, name),
        binary_data: Some(BTreeMap::from([(key.to_string(), ByteString(archive))])),
        ..Default::default()
    }
}

/// Secret mounted as the runner's `~/.ssh`; `None` without ssh data
pub fn ssh_secret(ctx: &RunContext) -> Option<Secret> {
    if ctx.ssh_config.is_empty() {
        return None;
    }
    Some(Secret {
        metadata: metadata(ctx, ctx.ssh_secret_name()),
        string_data: Some(ctx.ssh_config.clone()),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn config_map_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment contract of the runner container
pub fn job_env(ctx: &RunContext) -> Vec<EnvVar> {
    let main_module = ctx
        .module
        .as_ref()
        .map(ModuleSource::commit)
        .filter(|c| !c.is_empty())
        .unwrap_or("main_module");

    let mut envs = vec![
        env("TFOPS_MAIN_MODULE", main_module),
        env("NAMESPACE", ctx.namespace.clone()),
    ];

    match &ctx.module {
        Some(ModuleSource::Remote {
            repo,
            commit,
            subdir,
        }) => {
            envs.push(env("STACK_REPO", repo.clone()));
            envs.push(env("STACK_REPO_HASH", commit.clone()));
            if let Some(secret) = &ctx.token_secret {
                envs.push(EnvVar {
                    name: "GIT_PASSWORD".to_string(),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            name: secret.name.clone(),
                            key: secret.key.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
            if let Some(subdir) = subdir {
                envs.push(env("STACK_REPO_SUBDIR", subdir.clone()));
            }
        }
        Some(ModuleSource::Uploaded { config_maps, .. }) => {
            for (i, name) in config_maps.iter().enumerate() {
                envs.push(env(&format!("TFOPS_MODULE{i}"), name.clone()));
            }
        }
        None => {}
    }

    if ctx.is_new_resource {
        envs.push(env("IS_NEW_RESOURCE", "true"));
    }

    for (name, value) in &ctx.env {
        envs.push(env(name, value.clone()));
    }

    if let Some(tfvars) = &ctx.tfvars_config_map {
        envs.push(env(
            "TFOPS_VARFILE_FLAG",
            format!("-var-file {TFOPS_MOUNT_ROOT}/{tfvars}/{TFVARS_KEY}"),
        ));
        envs.push(env("TFOPS_CONFIGMAP_PATH", format!("{TFOPS_MOUNT_ROOT}/{tfvars}")));
    }

    envs.push(env("INSTANCE_NAME", ctx.name.clone()));
    envs
}

/// The runner Job
pub fn job(ctx: &RunContext, image: String) -> Job {
    let mut volumes = Vec::new();
    if let Some(ModuleSource::Uploaded { config_maps, .. }) = &ctx.module {
        volumes.extend(config_maps.iter().map(|name| config_map_volume(name)));
    }
    if let Some(tfvars) = &ctx.tfvars_config_map {
        volumes.push(config_map_volume(tfvars));
    }

    let mut mounts: Vec<VolumeMount> = volumes
        .iter()
        .map(|v| VolumeMount {
            name: v.name.clone(),
            mount_path: format!("{TFOPS_MOUNT_ROOT}/{}", v.name),
            ..Default::default()
        })
        .collect();

    if !ctx.ssh_config.is_empty() {
        volumes.push(Volume {
            name: SSH_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(ctx.ssh_secret_name()),
                default_mode: Some(0o600),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: SSH_VOLUME.to_string(),
            mount_path: SSH_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    let mut pod_annotations = BTreeMap::new();
    let mut env_from = Vec::new();
    match ctx.cloud_profile.as_deref().map(CloudProfile::parse) {
        Some(CloudProfile::Kiam(role)) => {
            pod_annotations.insert(KIAM_ROLE_ANNOTATION.to_string(), role.to_string());
        }
        Some(CloudProfile::Secret(name)) => env_from.push(EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        Some(CloudProfile::Irsa(_)) | None => {}
    }

    let container = Container {
        name: RUNNER_CONTAINER.to_string(),
        image: Some(image),
        image_pull_policy: Some("Always".to_string()),
        env: Some(job_env(ctx)),
        env_from: (!env_from.is_empty()).then_some(env_from),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    };

    let mut meta = metadata(ctx, ctx.name.clone());
    meta.annotations = Some(BTreeMap::from([(
        GENERATION_ANNOTATION.to_string(),
        ctx.generation.to_string(),
    )]));

    Job {
        metadata: meta,
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: (!pod_annotations.is_empty()).then_some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(ctx.service_account.clone()),
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![container],
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::source::ResolvedSecretRef;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn ctx() -> RunContext {
        RunContext {
            name: "demo".to_string(),
            run_name: "demo".to_string(),
            namespace: "team".to_string(),
            service_account: "tf-demo".to_string(),
            generation: 2,
            is_destroy: false,
            is_new_resource: true,
            apply_action: true,
            env: BTreeMap::from([("DEPLOYMENT".to_string(), "demo".to_string())]),
            terraform_version: None,
            cloud_profile: None,
            owner: Some(OwnerReference {
                api_version: "tf.tfops.io/v1alpha1".to_string(),
                kind: "Terraform".to_string(),
                name: "demo".to_string(),
                uid: "uid-1".to_string(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }),
            module: Some(ModuleSource::Remote {
                repo: "https://github.com/org/stack.git".to_string(),
                commit: "abc123".to_string(),
                subdir: Some("network".to_string()),
            }),
            tfvars_config_map: Some("demo-tfvars".to_string()),
            token_secret: Some(ResolvedSecretRef {
                name: "gh".to_string(),
                namespace: "team".to_string(),
                key: "token".to_string(),
            }),
            ssh_config: BTreeMap::new(),
        }
    }

    fn env_value<'a>(envs: &'a [EnvVar], name: &str) -> Option<&'a str> {
        envs.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn test_remote_job_environment() {
        let envs = job_env(&ctx());
        assert_eq!(env_value(&envs, "TFOPS_MAIN_MODULE"), Some("abc123"));
        assert_eq!(env_value(&envs, "STACK_REPO"), Some("https://github.com/org/stack.git"));
        assert_eq!(env_value(&envs, "STACK_REPO_HASH"), Some("abc123"));
        assert_eq!(env_value(&envs, "STACK_REPO_SUBDIR"), Some("network"));
        assert_eq!(env_value(&envs, "IS_NEW_RESOURCE"), Some("true"));
        assert_eq!(
            env_value(&envs, "TFOPS_VARFILE_FLAG"),
            Some("-var-file /tfops/demo-tfvars/tfvars")
        );
        assert_eq!(env_value(&envs, "TFOPS_CONFIGMAP_PATH"), Some("/tfops/demo-tfvars"));
        assert_eq!(env_value(&envs, "INSTANCE_NAME"), Some("demo"));

        let password = envs.iter().find(|e| e.name == "GIT_PASSWORD").unwrap();
        assert!(password.value.is_none());
        let selector = password
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, "gh");
        assert_eq!(selector.key, "token");
    }

    #[test]
    fn test_uploaded_modules_get_volumes() {
        let mut ctx = ctx();
        ctx.module = Some(ModuleSource::Uploaded {
            config_maps: vec!["demo-module".to_string()],
            commit: "abc123".to_string(),
        });
        let job = job(&ctx, "isaaguilar/tfops:0.12.29".to_string());
        let pod = job.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        let envs = container.env.as_ref().unwrap();
        assert_eq!(env_value(envs, "TFOPS_MODULE0"), Some("demo-module"));
        assert!(env_value(envs, "STACK_REPO").is_none());

        let mounts = container.volume_mounts.as_ref().unwrap();
        assert!(mounts
            .iter()
            .any(|m| m.name == "demo-module" && m.mount_path == "/tfops/demo-module"));
        assert!(mounts
            .iter()
            .any(|m| m.name == "demo-tfvars" && m.mount_path == "/tfops/demo-tfvars"));
    }

    #[test]
    fn test_job_shape() {
        let mut ctx = ctx();
        ctx.ssh_config = BTreeMap::from([("config".to_string(), "Host proxy\n".to_string())]);
        let job = job(&ctx, "isaaguilar/tfops:0.11.14".to_string());

        assert_eq!(job.metadata.name.as_deref(), Some("demo"));
        assert_eq!(
            job.metadata.annotations.as_ref().unwrap()[GENERATION_ANNOTATION],
            "2"
        );
        assert_eq!(job.metadata.owner_references.as_ref().unwrap()[0].uid, "uid-1");

        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(pod.service_account_name.as_deref(), Some("tf-demo"));
        let container = &pod.containers[0];
        assert_eq!(container.name, "tf");
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));

        let ssh = pod
            .volumes
            .unwrap()
            .into_iter()
            .find(|v| v.name == SSH_VOLUME)
            .unwrap();
        let secret = ssh.secret.unwrap();
        assert_eq!(secret.secret_name.as_deref(), Some("demo-ssh-config"));
        assert_eq!(secret.default_mode, Some(0o600));
    }

    #[test]
    fn test_cloud_profiles() {
        let mut ctx = ctx();
        ctx.cloud_profile = Some("kiam-terraform-role".to_string());
        let job = job(&ctx, "img".to_string());
        let template = job.spec.unwrap().template;
        assert_eq!(
            template.metadata.unwrap().annotations.unwrap()[KIAM_ROLE_ANNOTATION],
            "kiam-terraform-role"
        );

        ctx.cloud_profile =
            Some("irsa-arn:aws:iam::123456789012:role/terraform".to_string());
        let sa = service_account(&ctx);
        assert_eq!(
            sa.metadata.annotations.unwrap()[IRSA_ROLE_ANNOTATION],
            "arn:aws:iam::123456789012:role/terraform"
        );
        let job = super::job(&ctx, "img".to_string());
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        assert!(container.env_from.is_none());

        ctx.cloud_profile = Some("aws-creds".to_string());
        let job = super::job(&ctx, "img".to_string());
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let from = container.env_from.as_ref().unwrap();
        assert_eq!(from[0].secret_ref.as_ref().unwrap().name, "aws-creds");
    }

    #[test]
    fn test_supporting_objects() {
        let mut ctx = ctx();
        ctx.apply_action = false;
        let cm = action_config_map(&ctx);
        assert_eq!(cm.metadata.name.as_deref(), Some("demo-action"));
        assert_eq!(cm.data.unwrap()["action"], "plan-only");

        let role = role(&ctx);
        let rule = &role.rules.unwrap()[0];
        assert_eq!(rule.resources.as_deref(), Some(&["configmaps".to_string()][..]));
        assert_eq!(rule.verbs, vec!["*"]);

        let binding = role_binding(&ctx);
        assert_eq!(binding.role_ref.name, "demo");
        assert_eq!(binding.subjects.unwrap()[0].name, "tf-demo");

        assert!(ssh_secret(&ctx).is_none());
    }
}
