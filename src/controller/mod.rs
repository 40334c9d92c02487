//! # Controller
//!
//! Core controller modules for the Terraform controller.
//!
//! - `assembler`: Variable-file merge and config ConfigMap assembly
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `events`: Kubernetes events on runs
//! - `orchestrator`: Runner job object generation and submission
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `source`: Source addresses, credentials, bastion tunnels and git fetches

pub mod assembler;
pub mod backoff;
pub mod events;
pub mod orchestrator;
pub mod reconciler;
pub mod server;
pub mod source;
