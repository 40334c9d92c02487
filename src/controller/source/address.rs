//! # Source Addresses
//!
//! Parses Terraform-style source addresses:
//!
//! ```text
//! [git::]<scheme>://[user@]host[:port]/path[//subdir[//subdir2...]][?ref=X[&...]]
//! ```
//!
//! scp-like addresses (`git@host:org/repo.git`) are read as `ssh`.

use crate::constants::DEFAULT_GIT_USER;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*)://(?:(?P<user>[^@/]+)@)?(?P<host>[^/:@]+)(?::(?P<port>[0-9]+))?(?P<path>/.*)?$",
    )
    .expect("Failed to compile URL_PATTERN - this should never happen")
});

static SCP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<user>[^@/:]+)@)?(?P<host>[^@/:]+):(?P<path>[^/].*)$")
        .expect("Failed to compile SCP_PATTERN - this should never happen")
});

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unable to parse source address '{address}': {reason}")]
pub struct AddressParseError {
    pub address: String,
    pub reason: String,
}

impl AddressParseError {
    fn new(address: &str, reason: impl Into<String>) -> Self {
        Self {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// Transport of a parsed address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Ssh,
    Https,
    Http,
    Other(String),
}

impl Protocol {
    fn from_scheme(scheme: &str) -> Self {
        match scheme.to_ascii_lowercase().as_str() {
            "ssh" | "git+ssh" => Protocol::Ssh,
            "https" => Protocol::Https,
            "http" => Protocol::Http,
            other => Protocol::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Https => "https",
            Protocol::Http => "http",
            Protocol::Other(s) => s.as_str(),
        }
    }

    /// HTTP(S) transports; these take a SOCKS5 relay when tunnelled
    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Https | Protocol::Http)
    }
}

/// A source address broken into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Address minus subdirectories, with query arguments and any `git::` prefix kept
    pub source_dir: String,
    /// Clone URL: `source_dir` without `git::` and without query arguments
    pub repo: String,
    pub protocol: Protocol,
    /// Hostname without the port
    pub host: String,
    /// `22` for ssh and `443` for https when not given, empty otherwise
    pub port: String,
    pub user: String,
    /// Repository path on the host
    pub path: String,
    /// Subdirectories in declaration order
    pub subdirs: Vec<String>,
    /// `ref=` argument, last occurrence wins
    pub reference: Option<String>,
}

impl ParsedAddress {
    /// `host:port`, or the bare host when no port applies
    pub fn host_port(&self) -> String {
        if self.port.is_empty() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// ssh URL for reaching this repository through a local port forward
    pub fn tunnelled_ssh_url(&self, local_port: u16) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ssh://{}@127.0.0.1:{}{}", self.user, local_port, path)
    }
}

/// Parse a source address
pub fn parse_address(address: &str) -> Result<ParsedAddress, AddressParseError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressParseError::new(address, "address is empty"));
    }

    let (source_dir, subdir) = source_dir_subdir(address);
    let subdirs = if subdir.is_empty() {
        Vec::new()
    } else {
        subdir.split("//").map(str::to_string).collect()
    };
    let reference = extract_ref(&source_dir);

    let src = source_dir.strip_prefix("git::").unwrap_or(&source_dir);
    let repo = src.split('?').next().unwrap_or_default().to_string();
    if repo.is_empty() {
        return Err(AddressParseError::new(address, "no repository URL"));
    }

    let (protocol, user, host, port, path) = if let Some(caps) = URL_PATTERN.captures(&repo) {
        let protocol = Protocol::from_scheme(&caps["scheme"]);
        let user = caps.name("user").map(|m| m.as_str().to_string());
        let host = caps["host"].to_string();
        let port = caps.name("port").map(|m| m.as_str().to_string());
        let path = caps
            .name("path")
            .map_or_else(|| "/".to_string(), |m| m.as_str().to_string());
        (protocol, user, host, port, path)
    } else if let Some(caps) = SCP_PATTERN.captures(&repo) {
        let user = caps.name("user").map(|m| m.as_str().to_string());
        (
            Protocol::Ssh,
            user,
            caps["host"].to_string(),
            None,
            caps["path"].to_string(),
        )
    } else {
        return Err(AddressParseError::new(
            address,
            "expected <scheme>://host/path or user@host:path",
        ));
    };

    if host.is_empty() {
        return Err(AddressParseError::new(address, "missing host"));
    }

    let port = port.unwrap_or_else(|| match protocol {
        Protocol::Ssh => "22".to_string(),
        Protocol::Https => "443".to_string(),
        _ => String::new(),
    });
    let user = user
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_GIT_USER.to_string());

    Ok(ParsedAddress {
        source_dir,
        repo,
        protocol,
        host,
        port,
        user,
        path,
        subdirs,
        reference,
    })
}

/// Split an address into its source directory and `//` subdirectory part
///
/// Query arguments found after the subdirectory move back onto the source
/// directory, and a forced getter prefix (`git::`) stays on it.
fn source_dir_subdir(address: &str) -> (String, String) {
    let (forced, src) = match address.find("::") {
        Some(idx) => (&address[..idx + 2], &address[idx + 2..]),
        None => ("", address),
    };

    let stop = src.find('?').unwrap_or(src.len());
    let offset = src[..stop].find("://").map_or(0, |idx| idx + 3);

    let Some(idx) = src[offset..stop].find("//") else {
        return (format!("{forced}{src}"), String::new());
    };
    let idx = idx + offset;

    let mut subdir = src[idx + 2..].to_string();
    let mut dir = src[..idx].to_string();
    if let Some(q) = subdir.find('?') {
        dir.push_str(&subdir[q..]);
        subdir.truncate(q);
    }
    (format!("{forced}{dir}"), subdir)
}

/// Scan every `?`/`&` argument of the source directory for `ref=`
fn extract_ref(source_dir: &str) -> Option<String> {
    let mut reference = None;
    for segment in source_dir.split('?').skip(1) {
        for arg in segment.split('&') {
            if let Some((_, value)) = arg.split_once("ref=") {
                reference = Some(value.to_string());
            }
        }
    }
    reference.filter(|r| !r.is_empty())
}
