//! # Source Repository
//!
//! Git access behind the [`SourceRepository`] trait. [`GitCli`] drives the
//! system `git` executable: clone at a reference, report the commit, and the
//! branch/commit/push steps used by the export repository.
//!
//! Transport settings (ssh key, token, proxy) are handed to each `git`
//! invocation through its environment. Nothing of them is written to the
//! working copy's `.git/config` or shows up in process arguments.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Environment variable carrying an access token to the inline credential helper
const TOKEN_ENV: &str = "TFOPS_GIT_TOKEN";

/// Answers git's credential prompt from [`TOKEN_ENV`] as user `git`
const TOKEN_CREDENTIAL_HELPER: &str =
    "!f() { test \"$1\" = get || exit 0; echo username=git; echo \"password=${TFOPS_GIT_TOKEN}\"; }; f";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {operation} failed for {target}: {stderr}")]
    Git {
        operation: &'static str,
        target: String,
        stderr: String,
    },
    #[error("failed to prepare working copy: {0}")]
    Io(#[from] std::io::Error),
}

/// How a fetch authenticates
#[derive(Debug, Clone, Copy)]
pub enum FetchAuth<'a> {
    /// Private key file, already written with mode 0600
    SshKey(&'a Path),
    /// Token sent as the password of user `git`
    Token(&'a str),
    Anonymous,
}

/// Where a repository lives and how to reach it
#[derive(Debug, Clone, Copy)]
pub struct Remote<'a> {
    pub url: &'a str,
    pub auth: FetchAuth<'a>,
    /// Transport proxy for http(s), e.g. `socks5h://127.0.0.1:1080`
    pub proxy: Option<&'a str>,
}

/// Everything needed to materialize one working copy
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub remote: Remote<'a>,
    /// Must not exist yet; created by the clone
    pub local_dir: &'a Path,
    /// Branch, tag or commit to check out; remote HEAD when `None`
    pub reference: Option<&'a str>,
}

/// Git operations the controller needs
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Clone `request.remote` into `request.local_dir` at the requested
    /// reference and return the checked-out commit id
    async fn fetch_at(&self, request: &FetchRequest<'_>) -> Result<String, FetchError>;

    /// Create or reset `branch` at the current commit and switch to it
    async fn checkout_branch(&self, workdir: &Path, branch: &str) -> Result<(), FetchError>;

    /// Commit `paths`; returns `false` when there was nothing to commit
    async fn commit(
        &self,
        workdir: &Path,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<bool, FetchError>;

    /// Push the current commit to `remote`, to `branch` when given, else to
    /// the branch of the same name as HEAD
    async fn push(
        &self,
        workdir: &Path,
        remote: &Remote<'_>,
        branch: Option<&str>,
    ) -> Result<(), FetchError>;
}

/// Per-invocation environment for one remote
#[derive(Default)]
struct Transport {
    env: Vec<(String, Zeroizing<String>)>,
    secret: Option<Zeroizing<String>>,
}

impl Transport {
    fn new(remote: &Remote<'_>) -> Self {
        let mut transport = Transport::default();
        let mut config: Vec<(&str, String)> = Vec::new();

        match remote.auth {
            FetchAuth::SshKey(key_path) => transport.set("GIT_SSH_COMMAND", git_ssh_command(key_path)),
            FetchAuth::Token(token) => {
                // an empty value clears helpers inherited from system or global config
                config.push(("credential.helper", String::new()));
                config.push(("credential.helper", TOKEN_CREDENTIAL_HELPER.to_string()));
                transport.set(TOKEN_ENV, token.to_string());
                transport.secret = Some(Zeroizing::new(token.to_string()));
            }
            FetchAuth::Anonymous => {}
        }
        if let Some(proxy) = remote.proxy {
            config.push(("http.proxy", proxy.to_string()));
        }

        if !config.is_empty() {
            transport.set("GIT_CONFIG_COUNT", config.len().to_string());
            for (i, (key, value)) in config.into_iter().enumerate() {
                transport.set(&format!("GIT_CONFIG_KEY_{i}"), key.to_string());
                transport.set(&format!("GIT_CONFIG_VALUE_{i}"), value);
            }
        }
        transport
    }

    fn set(&mut self, key: &str, value: String) {
        self.env.push((key.to_string(), Zeroizing::new(value)));
    }

    fn redact(&self, text: String) -> String {
        match self.secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => text.replace(secret, "***"),
            None => text,
        }
    }
}

/// [`SourceRepository`] backed by the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    git_binary: String,
    author_name: String,
    author_email: String,
}

impl GitCli {
    pub fn new(git_binary: impl Into<String>) -> Self {
        Self {
            git_binary: git_binary.into(),
            author_name: "tfops-controller".to_string(),
            author_email: "tfops-controller@localhost".to_string(),
        }
    }

    async fn run(
        &self,
        operation: &'static str,
        target: &str,
        args: Vec<OsString>,
        transport: &Transport,
    ) -> Result<String, FetchError> {
        let mut cmd = Command::new(&self.git_binary);
        cmd.args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &transport.env {
            cmd.env(key, value.as_str());
        }

        debug!(operation, target, "Running git");
        let output = cmd.output().await.map_err(|source| FetchError::Spawn {
            program: self.git_binary.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::Git {
                operation,
                target: target.to_string(),
                stderr: transport.redact(stderr),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `GIT_SSH_COMMAND` value using the given key
pub fn git_ssh_command(key_path: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
        key_path.display()
    )
}

#[async_trait]
impl SourceRepository for GitCli {
    async fn fetch_at(&self, request: &FetchRequest<'_>) -> Result<String, FetchError> {
        let url = request.remote.url;
        let transport = Transport::new(&request.remote);
        let local = Transport::default();

        let args = vec![
            OsString::from("clone"),
            url.into(),
            request.local_dir.as_os_str().to_owned(),
        ];
        self.run("clone", url, args, &transport).await?;

        if let Some(reference) = request.reference {
            let args = vec![
                OsString::from("-C"),
                request.local_dir.as_os_str().to_owned(),
                "checkout".into(),
                "--quiet".into(),
                reference.into(),
            ];
            self.run("checkout", url, args, &local).await?;
        }

        let args = vec![
            OsString::from("-C"),
            request.local_dir.as_os_str().to_owned(),
            "rev-parse".into(),
            "HEAD".into(),
        ];
        let commit = self.run("rev-parse", url, args, &local).await?;
        info!(
            repository = url,
            reference = request.reference.unwrap_or("HEAD"),
            commit = commit.as_str(),
            "Fetched source"
        );
        Ok(commit)
    }

    async fn checkout_branch(&self, workdir: &Path, branch: &str) -> Result<(), FetchError> {
        let args = vec![
            OsString::from("-C"),
            workdir.as_os_str().to_owned(),
            "checkout".into(),
            "-B".into(),
            branch.into(),
        ];
        self.run("checkout", &workdir.display().to_string(), args, &Transport::default())
            .await
            .map(|_| ())
    }

    async fn commit(
        &self,
        workdir: &Path,
        paths: &[PathBuf],
        message: &str,
    ) -> Result<bool, FetchError> {
        let target = workdir.display().to_string();
        let local = Transport::default();

        let mut add = vec![
            OsString::from("-C"),
            workdir.as_os_str().to_owned(),
            "add".into(),
            "--".into(),
        ];
        add.extend(paths.iter().map(|p| p.as_os_str().to_owned()));
        self.run("add", &target, add, &local).await?;

        let status = vec![
            OsString::from("-C"),
            workdir.as_os_str().to_owned(),
            "status".into(),
            "--porcelain".into(),
        ];
        if self.run("status", &target, status, &local).await?.is_empty() {
            debug!(workdir = target.as_str(), "Nothing to commit");
            return Ok(false);
        }

        let commit = vec![
            OsString::from("-C"),
            workdir.as_os_str().to_owned(),
            "-c".into(),
            format!("user.name={}", self.author_name).into(),
            "-c".into(),
            format!("user.email={}", self.author_email).into(),
            "commit".into(),
            "--quiet".into(),
            "-m".into(),
            message.into(),
        ];
        self.run("commit", &target, commit, &local).await?;
        Ok(true)
    }

    async fn push(
        &self,
        workdir: &Path,
        remote: &Remote<'_>,
        branch: Option<&str>,
    ) -> Result<(), FetchError> {
        let refspec = match branch {
            Some(b) => format!("HEAD:refs/heads/{b}"),
            None => "HEAD".to_string(),
        };
        let args = vec![
            OsString::from("-C"),
            workdir.as_os_str().to_owned(),
            "push".into(),
            remote.url.into(),
            refspec.into(),
        ];
        self.run("push", remote.url, args, &Transport::new(remote))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn env_value<'a>(transport: &'a Transport, key: &str) -> Option<&'a str> {
        transport
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn git(dir: &Path, args: &[&str]) -> std::process::Output {
        StdCommand::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .unwrap()
    }

    /// A bare repository with one commit, or `None` when `git` is not installed
    fn seeded_bare_repo(root: &Path) -> Option<PathBuf> {
        which::which("git").ok()?;
        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        assert!(git(&seed, &["init", "-q"]).status.success());
        std::fs::write(seed.join("README"), "seed\n").unwrap();
        assert!(git(&seed, &["add", "README"]).status.success());
        assert!(git(
            &seed,
            &["-c", "user.name=t", "-c", "user.email=t@localhost", "commit", "-q", "-m", "seed"]
        )
        .status
        .success());

        let bare = root.join("remote.git");
        let out = StdCommand::new("git")
            .args(["clone", "-q", "--bare"])
            .arg(&seed)
            .arg(&bare)
            .output()
            .unwrap();
        assert!(out.status.success());
        Some(bare)
    }

    #[test]
    fn test_git_ssh_command_disables_host_key_prompts() {
        let cmd = git_ssh_command(Path::new("/work/.ssh/id_rsa"));
        assert!(cmd.starts_with("ssh -i /work/.ssh/id_rsa"));
        assert!(cmd.contains("StrictHostKeyChecking=no"));
        assert!(cmd.contains("UserKnownHostsFile=/dev/null"));
    }

    #[test]
    fn test_token_and_proxy_travel_in_environment() {
        let transport = Transport::new(&Remote {
            url: "https://github.com/org/repo.git",
            auth: FetchAuth::Token("s3cr3t"),
            proxy: Some("socks5h://127.0.0.1:1080"),
        });

        assert_eq!(env_value(&transport, TOKEN_ENV), Some("s3cr3t"));
        assert_eq!(env_value(&transport, "GIT_CONFIG_COUNT"), Some("3"));
        assert_eq!(env_value(&transport, "GIT_CONFIG_KEY_0"), Some("credential.helper"));
        assert_eq!(env_value(&transport, "GIT_CONFIG_VALUE_0"), Some(""));
        assert_eq!(
            env_value(&transport, "GIT_CONFIG_VALUE_1"),
            Some(TOKEN_CREDENTIAL_HELPER)
        );
        assert_eq!(env_value(&transport, "GIT_CONFIG_KEY_2"), Some("http.proxy"));
        assert_eq!(
            env_value(&transport, "GIT_CONFIG_VALUE_2"),
            Some("socks5h://127.0.0.1:1080")
        );
        assert!(!TOKEN_CREDENTIAL_HELPER.contains("s3cr3t"));
        assert_eq!(
            transport.redact("fatal: bad token s3cr3t".to_string()),
            "fatal: bad token ***"
        );
    }

    #[test]
    fn test_ssh_key_sets_ssh_command_only() {
        let transport = Transport::new(&Remote {
            url: "ssh://git@127.0.0.1:40001/org/repo.git",
            auth: FetchAuth::SshKey(Path::new("/work/.ssh/id_rsa")),
            proxy: None,
        });
        assert!(env_value(&transport, "GIT_SSH_COMMAND")
            .is_some_and(|c| c.starts_with("ssh -i /work/.ssh/id_rsa")));
        assert!(env_value(&transport, "GIT_CONFIG_COUNT").is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let git = GitCli::new("/nonexistent/git-binary");
        let dir = tempfile::tempdir().unwrap();
        let err = git
            .fetch_at(&FetchRequest {
                remote: Remote {
                    url: "https://example.com/repo.git",
                    auth: FetchAuth::Anonymous,
                    proxy: None,
                },
                local_dir: &dir.path().join("repo"),
                reference: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_clone_leaves_no_transport_settings_in_config() {
        let root = tempfile::tempdir().unwrap();
        let Some(bare) = seeded_bare_repo(root.path()) else {
            return;
        };
        let url = bare.display().to_string();
        let clone = root.path().join("clone");

        let commit = GitCli::new("git")
            .fetch_at(&FetchRequest {
                remote: Remote {
                    url: &url,
                    auth: FetchAuth::Token("s3cr3t-token"),
                    proxy: Some("socks5h://127.0.0.1:9"),
                },
                local_dir: &clone,
                reference: None,
            })
            .await
            .unwrap();
        assert_eq!(commit.len(), 40);

        let proxy = git(&clone, &["config", "--get", "http.proxy"]);
        assert!(!proxy.status.success(), "http.proxy must not be persisted");
        let origin = git(&clone, &["config", "--get", "remote.origin.url"]);
        assert_eq!(String::from_utf8_lossy(&origin.stdout).trim(), url);

        let config = std::fs::read_to_string(clone.join(".git/config")).unwrap();
        assert!(!config.contains("s3cr3t-token"));
        assert!(!config.contains("credential"));
    }

    #[tokio::test]
    async fn test_push_goes_to_given_remote_and_branch() {
        let root = tempfile::tempdir().unwrap();
        let Some(bare) = seeded_bare_repo(root.path()) else {
            return;
        };
        let url = bare.display().to_string();
        let remote = Remote {
            url: &url,
            auth: FetchAuth::Anonymous,
            proxy: None,
        };
        let clone = root.path().join("clone");
        let cli = GitCli::new("git");
        cli.fetch_at(&FetchRequest {
            remote,
            local_dir: &clone,
            reference: None,
        })
        .await
        .unwrap();

        cli.checkout_branch(&clone, "vars").await.unwrap();
        std::fs::write(clone.join("demo.tfvars"), "a = 1\n").unwrap();
        assert!(cli
            .commit(&clone, &[PathBuf::from("demo.tfvars")], "export")
            .await
            .unwrap());
        assert!(!cli
            .commit(&clone, &[PathBuf::from("demo.tfvars")], "export")
            .await
            .unwrap());
        cli.push(&clone, &remote, Some("vars")).await.unwrap();

        let pushed = git(&bare, &["show", "vars:demo.tfvars"]);
        assert_eq!(String::from_utf8_lossy(&pushed.stdout), "a = 1\n");
    }
}
