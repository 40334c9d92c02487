//! # Source Access
//!
//! Everything between a source address on a run and a working copy on disk:
//!
//! - [`address`]: address parsing
//! - [`credentials`]: per-host credential selection backed by [`SecretStore`]
//! - [`tunnel`]: SSH bastion port forwards and SOCKS5 relays
//! - [`repository`]: git operations behind [`SourceRepository`]
//! - [`fetcher`]: the fetch pipeline tying the above together

pub mod address;
pub mod credentials;
pub mod fetcher;
pub mod repository;
pub mod tunnel;

pub use address::{parse_address, AddressParseError, ParsedAddress, Protocol};
pub use credentials::{
    matching_method, select_credential, CredentialError, GitCredential, KubeSecretStore,
    ResolvedSecretRef, SecretStore, SecretStoreError,
};
pub use fetcher::{FetchContext, FetchedSource, SourceError, SourceFetcher};
pub use repository::{FetchAuth, FetchError, FetchRequest, GitCli, Remote, SourceRepository};
pub use tunnel::{
    open_tunnel, BastionTarget, SshTunnelOpener, Tunnel, TunnelKind, TunnelOpener, TunnelStartError,
};
