//! # Configuration
//!
//! Controller configuration loaded once at startup from the environment.

mod controller;

pub use controller::ControllerConfig;

/// Shared, read-only controller configuration
pub type SharedControllerConfig = std::sync::Arc<ControllerConfig>;
