//! # Authentication
//!
//! Git authentication methods, the SSH bastion descriptor and secret references.

use serde::{Deserialize, Serialize};

/// Reference to a key inside a Kubernetes secret
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    /// Defaults to the run's namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Defaults to `id_rsa` for SSH keys and `token` for HTTPS tokens
    #[serde(default)]
    pub key: Option<String>,
}

impl SecretRef {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(default)
    }

    pub fn key_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.key.as_deref().filter(|k| !k.is_empty()).unwrap_or(default)
    }
}

/// Authentication for one git host
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScmAuthMethod {
    /// Hostname, optionally with `:port`
    pub host: String,
    pub git: GitAuth,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitAuth {
    #[serde(default)]
    pub ssh: Option<GitSshAuth>,
    #[serde(default)]
    pub https: Option<GitHttpsAuth>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSshAuth {
    /// The runner reaches this host through the bastion (`ProxyJump`)
    #[serde(default)]
    pub require_proxy: bool,
    pub ssh_key_secret_ref: SecretRef,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitHttpsAuth {
    pub token_secret_ref: SecretRef,
}

/// SSH bastion
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshTunnel {
    /// Bastion host, optionally with `:port`
    pub host: String,
    pub user: String,
    pub ssh_key_secret_ref: SecretRef,
}

impl ScmAuthMethod {
    /// Whether this entry applies to `host` (bare hostname) reached on `port`
    pub fn matches(&self, host: &str, port: &str) -> bool {
        if self.host == host {
            return true;
        }
        !port.is_empty() && self.host == format!("{host}:{port}")
    }
}
