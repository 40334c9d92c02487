//! # Runner SSH Configuration
//!
//! Builds the contents of the runner's `~/.ssh`: an ssh client `config` plus
//! the private keys it references. The bastion is reachable as host `proxy`
//! with key `proxy_key`; every ssh auth method gets a `Host` block whose key
//! file is named after the host, jumping through `proxy` when required.

use crate::constants::DEFAULT_SSH_KEY;
use crate::controller::source::{ResolvedSecretRef, SecretStore, SecretStoreError};
use crate::crd::{ScmAuthMethod, SshTunnel};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const SSH_CONFIG_KEY: &str = "config";
pub const PROXY_KEY: &str = "proxy_key";

/// `config` text for the given bastion and auth methods
pub fn render_ssh_config(bastion: Option<&SshTunnel>, methods: &[ScmAuthMethod]) -> String {
    let mut config = String::new();
    if let Some(bastion) = bastion {
        let _ = write!(
            config,
            "Host proxy\n\tStrictHostKeyChecking no\n\tUserKnownHostsFile=/dev/null\n\tUser {}\n\tHostname {}\n\tIdentityFile ~/.ssh/{PROXY_KEY}\n",
            bastion.user, bastion.host
        );
    }

    for method in methods {
        let Some(ssh) = &method.git.ssh else {
            continue;
        };
        let _ = write!(
            config,
            "\nHost {host}\n\tStrictHostKeyChecking no\n\tUserKnownHostsFile=/dev/null\n\tHostname {host}\n\tIdentityFile ~/.ssh/{host}\n",
            host = method.host
        );
        if ssh.require_proxy {
            config.push_str("\tProxyJump proxy\n");
        }
    }
    config
}

/// Secret data for the runner's `~/.ssh`; empty when no ssh access is configured
pub async fn job_ssh_data(
    bastion: Option<&SshTunnel>,
    methods: &[ScmAuthMethod],
    run_namespace: &str,
    store: &dyn SecretStore,
) -> Result<BTreeMap<String, String>, SecretStoreError> {
    let mut data = BTreeMap::new();
    if !methods.iter().any(|m| m.git.ssh.is_some()) {
        return Ok(data);
    }

    if let Some(bastion) = bastion {
        let key = ResolvedSecretRef::resolve(&bastion.ssh_key_secret_ref, run_namespace, DEFAULT_SSH_KEY)
            .read(store)
            .await?;
        data.insert(PROXY_KEY.to_string(), key.to_string());
    }

    for method in methods {
        let Some(ssh) = &method.git.ssh else {
            continue;
        };
        let key = ResolvedSecretRef::resolve(&ssh.ssh_key_secret_ref, run_namespace, DEFAULT_SSH_KEY)
            .read(store)
            .await?;
        data.insert(method.host.clone(), key.to_string());
    }

    data.insert(SSH_CONFIG_KEY.to_string(), render_ssh_config(bastion, methods));
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::source::credentials::testing::FakeSecretStore;
    use crate::crd::{GitAuth, GitHttpsAuth, GitSshAuth, SecretRef};

    fn secret(name: &str) -> SecretRef {
        SecretRef {
            name: name.to_string(),
            namespace: None,
            key: None,
        }
    }

    fn ssh_method(host: &str, require_proxy: bool) -> ScmAuthMethod {
        ScmAuthMethod {
            host: host.to_string(),
            git: GitAuth {
                ssh: Some(GitSshAuth {
                    require_proxy,
                    ssh_key_secret_ref: secret(&format!("{host}-key")),
                }),
                https: None,
            },
        }
    }

    fn bastion() -> SshTunnel {
        SshTunnel {
            host: "bastion.example.com".to_string(),
            user: "ops".to_string(),
            ssh_key_secret_ref: secret("bastion-key"),
        }
    }

    #[test]
    fn test_render_proxy_and_hosts() {
        let config = render_ssh_config(
            Some(&bastion()),
            &[ssh_method("git.internal", true), ssh_method("github.com", false)],
        );
        assert!(config.starts_with("Host proxy\n"));
        assert!(config.contains("\tUser ops\n\tHostname bastion.example.com\n"));
        assert!(config.contains(
            "\nHost git.internal\n\tStrictHostKeyChecking no\n\tUserKnownHostsFile=/dev/null\n\tHostname git.internal\n\tIdentityFile ~/.ssh/git.internal\n\tProxyJump proxy\n"
        ));
        let github = config.split("Host github.com").nth(1).unwrap();
        assert!(!github.contains("ProxyJump"));
    }

    #[tokio::test]
    async fn test_data_holds_keys_per_host() {
        let store = FakeSecretStore::default()
            .with("team", "bastion-key", "id_rsa", "BASTION")
            .with("team", "git.internal-key", "id_rsa", "INTERNAL");
        let data = job_ssh_data(
            Some(&bastion()),
            &[ssh_method("git.internal", true)],
            "team",
            &store,
        )
        .await
        .unwrap();
        assert_eq!(data[PROXY_KEY], "BASTION");
        assert_eq!(data["git.internal"], "INTERNAL");
        assert!(data[SSH_CONFIG_KEY].contains("ProxyJump proxy"));
    }

    #[tokio::test]
    async fn test_https_only_needs_no_ssh_data() {
        let methods = vec![ScmAuthMethod {
            host: "github.com".to_string(),
            git: GitAuth {
                ssh: None,
                https: Some(GitHttpsAuth {
                    token_secret_ref: secret("gh"),
                }),
            },
        }];
        let data = job_ssh_data(Some(&bastion()), &methods, "team", &FakeSecretStore::default())
            .await
            .unwrap();
        assert!(data.is_empty());
    }
}
