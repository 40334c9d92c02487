//! # Runtime
//!
//! Process-level wiring around the reconciler.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server and client setup
//! - `watch_loop`: the `Terraform`/`Job` controller stream and its restarts
//! - `error_policy`: retry backoff for failed passes and watch errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
