//! # Custom Resource Definitions
//!
//! CRD types for the Terraform controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - Main CRD specification and default values
//! - `source.rs` - Source addresses for the stack and config sources
//! - `auth.rs` - Git authentication, SSH bastion and secret references
//! - `status.rs` - Status types for tracking the run's job

mod auth;
mod source;
mod spec;
mod status;

// Re-export all public types
pub use auth::{GitAuth, GitHttpsAuth, GitSshAuth, ScmAuthMethod, SecretRef, SshTunnel};
pub use source::SrcOpts;
pub use spec::{
    ConfigSpec, EnvVar, ExportRepo, StackSpec, Terraform, TerraformSpec, default_false,
};
pub use status::{RunPhase, TerraformStatus};
