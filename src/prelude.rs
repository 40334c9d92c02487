//! # Prelude
//!
//! Re-exports commonly used types.
//!
//! ```rust
//! use tfops_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{reconcile, Reconciler, ReconcilerError};

pub use crate::config::{ControllerConfig, SharedControllerConfig};

// Error types of the pipeline stages
pub use crate::controller::assembler::AssemblyError;
pub use crate::controller::orchestrator::{SubmissionError, UploadError};
pub use crate::controller::source::SourceError;
