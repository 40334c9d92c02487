//! # Credentials
//!
//! Picks the git authentication for a host and loads its material from
//! Kubernetes secrets through [`SecretStore`].

use crate::constants::{DEFAULT_SSH_KEY, DEFAULT_TOKEN_KEY};
use crate::controller::source::address::{ParsedAddress, Protocol};
use crate::crd::{ScmAuthMethod, SecretRef, SshTunnel};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("secret {namespace}/{name} not found or has no key '{key}'")]
    NotFound {
        name: String,
        namespace: String,
        key: String,
    },
    #[error("key '{key}' in secret {namespace}/{name} is not valid UTF-8")]
    InvalidUtf8 {
        name: String,
        namespace: String,
        key: String,
    },
    #[error("failed to read secret {namespace}/{name}: {source}")]
    Api {
        name: String,
        namespace: String,
        #[source]
        source: kube::Error,
    },
}

/// Read access to namespaced secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Value of `key` in secret `name`; [`SecretStoreError::NotFound`] when
    /// either the secret or the key is absent
    async fn read_key(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Zeroizing<String>, SecretStoreError>;
}

/// [`SecretStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn read_key(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Zeroizing<String>, SecretStoreError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let not_found = || SecretStoreError::NotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
        };

        let secret = secrets
            .get_opt(name)
            .await
            .map_err(|source| SecretStoreError::Api {
                name: name.to_string(),
                namespace: namespace.to_string(),
                source,
            })?
            .ok_or_else(not_found)?;

        let bytes = secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .filter(|v| !v.0.is_empty())
            .ok_or_else(not_found)?;

        let value = String::from_utf8(bytes.0.clone()).map_err(|_| SecretStoreError::InvalidUtf8 {
            name: name.to_string(),
            namespace: namespace.to_string(),
            key: key.to_string(),
        })?;
        Ok(Zeroizing::new(value))
    }
}

/// A secret reference with its defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecretRef {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

impl ResolvedSecretRef {
    pub fn resolve(secret_ref: &SecretRef, run_namespace: &str, default_key: &str) -> Self {
        Self {
            name: secret_ref.name.clone(),
            namespace: secret_ref.namespace_or(run_namespace).to_string(),
            key: secret_ref.key_or(default_key).to_string(),
        }
    }

    pub async fn read(&self, store: &dyn SecretStore) -> Result<Zeroizing<String>, SecretStoreError> {
        store.read_key(&self.name, &self.namespace, &self.key).await
    }
}

/// Credential material for one fetch
pub enum GitCredential {
    Ssh {
        private_key: Zeroizing<String>,
    },
    Https {
        token: Zeroizing<String>,
        secret: ResolvedSecretRef,
    },
    /// Public repository over HTTP(S)
    Anonymous,
}

impl std::fmt::Debug for GitCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitCredential::Ssh { .. } => f.write_str("GitCredential::Ssh(***)"),
            GitCredential::Https { secret, .. } => f
                .debug_struct("GitCredential::Https")
                .field("secret", secret)
                .field("token", &"***")
                .finish(),
            GitCredential::Anonymous => f.write_str("GitCredential::Anonymous"),
        }
    }
}

impl GitCredential {
    pub fn kind(&self) -> &'static str {
        match self {
            GitCredential::Ssh { .. } => "ssh",
            GitCredential::Https { .. } => "https",
            GitCredential::Anonymous => "anonymous",
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no ssh key configured in scmAuthMethods for host '{host}'")]
    NoCredential { host: String },
    #[error("protocol '{protocol}' is not supported for git sources")]
    UnsupportedProtocol { protocol: String },
    #[error("failed to load credential: {0}")]
    Secret(#[from] SecretStoreError),
}

/// First auth method configured for the address's host
pub fn matching_method<'a>(
    methods: &'a [ScmAuthMethod],
    address: &ParsedAddress,
) -> Option<&'a ScmAuthMethod> {
    methods
        .iter()
        .find(|m| m.matches(&address.host, &address.port))
}

/// Select and load the credential for fetching `address`
///
/// SSH always needs a key. HTTP(S) without a matching token entry falls back to
/// an anonymous fetch.
pub async fn select_credential(
    methods: &[ScmAuthMethod],
    address: &ParsedAddress,
    run_namespace: &str,
    store: &dyn SecretStore,
) -> Result<GitCredential, CredentialError> {
    let method = matching_method(methods, address);

    match &address.protocol {
        Protocol::Ssh => {
            let ssh = method
                .and_then(|m| m.git.ssh.as_ref())
                .ok_or_else(|| CredentialError::NoCredential {
                    host: address.host.clone(),
                })?;
            let secret =
                ResolvedSecretRef::resolve(&ssh.ssh_key_secret_ref, run_namespace, DEFAULT_SSH_KEY);
            info!(
                host = address.host.as_str(),
                secret = secret.name.as_str(),
                "Using git over ssh with a key"
            );
            let private_key = secret.read(store).await?;
            Ok(GitCredential::Ssh { private_key })
        }
        Protocol::Https | Protocol::Http => {
            let Some(https) = method.and_then(|m| m.git.https.as_ref()) else {
                debug!(
                    host = address.host.as_str(),
                    "No https token configured, fetching anonymously"
                );
                return Ok(GitCredential::Anonymous);
            };
            let secret = ResolvedSecretRef::resolve(
                &https.token_secret_ref,
                run_namespace,
                DEFAULT_TOKEN_KEY,
            );
            info!(
                host = address.host.as_str(),
                secret = secret.name.as_str(),
                "Using git over https with a token"
            );
            let token = secret.read(store).await?;
            Ok(GitCredential::Https { token, secret })
        }
        Protocol::Other(protocol) => Err(CredentialError::UnsupportedProtocol {
            protocol: protocol.clone(),
        }),
    }
}

/// Private key used to log in to the bastion
pub async fn load_bastion_key(
    tunnel: &SshTunnel,
    run_namespace: &str,
    store: &dyn SecretStore,
) -> Result<Zeroizing<String>, SecretStoreError> {
    ResolvedSecretRef::resolve(&tunnel.ssh_key_secret_ref, run_namespace, DEFAULT_SSH_KEY)
        .read(store)
        .await
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory [`SecretStore`] keyed by `(namespace, name, key)`
    #[derive(Default)]
    pub struct FakeSecretStore {
        pub values: HashMap<(String, String, String), String>,
        pub reads: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeSecretStore {
        pub fn with(mut self, namespace: &str, name: &str, key: &str, value: &str) -> Self {
            self.values.insert(
                (namespace.to_string(), name.to_string(), key.to_string()),
                value.to_string(),
            );
            self
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecretStore {
        async fn read_key(
            &self,
            name: &str,
            namespace: &str,
            key: &str,
        ) -> Result<Zeroizing<String>, SecretStoreError> {
            let id = (namespace.to_string(), name.to_string(), key.to_string());
            self.reads.lock().unwrap().push(id.clone());
            self.values
                .get(&id)
                .map(|v| Zeroizing::new(v.clone()))
                .ok_or(SecretStoreError::NotFound {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSecretStore;
    use super::*;
    use crate::controller::source::address::parse_address;
    use crate::crd::{GitAuth, GitHttpsAuth, GitSshAuth};

    fn ssh_method(host: &str, secret: &str) -> ScmAuthMethod {
        ScmAuthMethod {
            host: host.to_string(),
            git: GitAuth {
                ssh: Some(GitSshAuth {
                    require_proxy: false,
                    ssh_key_secret_ref: SecretRef {
                        name: secret.to_string(),
                        namespace: None,
                        key: None,
                    },
                }),
                https: None,
            },
        }
    }

    fn https_method(host: &str, secret: &str, namespace: Option<&str>) -> ScmAuthMethod {
        ScmAuthMethod {
            host: host.to_string(),
            git: GitAuth {
                ssh: None,
                https: Some(GitHttpsAuth {
                    token_secret_ref: SecretRef {
                        name: secret.to_string(),
                        namespace: namespace.map(str::to_string),
                        key: None,
                    },
                }),
            },
        }
    }

    #[tokio::test]
    async fn test_ssh_uses_default_key_in_run_namespace() {
        let store = FakeSecretStore::default().with("team", "deploy-key", "id_rsa", "KEY");
        let address = parse_address("ssh://git@github.com/org/stack.git").unwrap();
        let methods = vec![ssh_method("github.com", "deploy-key")];

        let cred = select_credential(&methods, &address, "team", &store)
            .await
            .unwrap();
        match cred {
            GitCredential::Ssh { private_key } => assert_eq!(private_key.as_str(), "KEY"),
            other => panic!("expected ssh credential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_matching_host_wins() {
        let store = FakeSecretStore::default()
            .with("ops", "first", "token", "one")
            .with("team", "second", "token", "two");
        let address = parse_address("https://github.com/org/stack.git").unwrap();
        let methods = vec![
            https_method("gitlab.com", "other", None),
            https_method("github.com", "first", Some("ops")),
            https_method("github.com", "second", None),
        ];

        let cred = select_credential(&methods, &address, "team", &store)
            .await
            .unwrap();
        match cred {
            GitCredential::Https { token, secret } => {
                assert_eq!(token.as_str(), "one");
                assert_eq!(secret.namespace, "ops");
                assert_eq!(secret.key, "token");
            }
            other => panic!("expected https credential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ssh_without_match_is_no_credential() {
        let store = FakeSecretStore::default();
        let address = parse_address("git@bitbucket.org:org/stack.git").unwrap();
        let methods = vec![ssh_method("github.com", "deploy-key")];

        let err = select_credential(&methods, &address, "team", &store)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NoCredential { host } if host == "bitbucket.org"));
        assert!(store.reads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_https_without_match_is_anonymous() {
        let store = FakeSecretStore::default();
        let address = parse_address("https://github.com/org/public.git").unwrap();

        let cred = select_credential(&[], &address, "team", &store).await.unwrap();
        assert!(matches!(cred, GitCredential::Anonymous));
    }

    #[tokio::test]
    async fn test_missing_secret_key_is_reported() {
        let store = FakeSecretStore::default();
        let address = parse_address("https://github.com/org/stack.git").unwrap();
        let methods = vec![https_method("github.com", "absent", None)];

        let err = select_credential(&methods, &address, "team", &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Secret(SecretStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_material() {
        let cred = GitCredential::Ssh {
            private_key: Zeroizing::new("-----BEGIN KEY-----".to_string()),
        };
        assert!(!format!("{cred:?}").contains("BEGIN"));
    }
}
