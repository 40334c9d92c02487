//! Terraform Controller Library
//!
//! Core functionality for the Terraform controller: the `Terraform` CRD, the
//! source fetcher, config assembly, runner job orchestration and the
//! reconciler that ties them together.
//!
//! ## Quick Start
//!
//! ```rust
//! use tfops_controller::prelude::*;
//! ```
//!
//! This brings commonly used types into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
