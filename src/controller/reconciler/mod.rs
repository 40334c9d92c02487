//! # Reconciler
//!
//! Core reconciliation logic for `Terraform` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Re-read the run; a missing run ends the pass
//! 2. Deleted runs go through finalization (destroy job, then finalizer release)
//! 3. Live runs get the finalizer
//! 4. The run's job decides the rest:
//!    - **No job**: fetch, assemble and submit (`pipeline.rs`)
//!    - **Active**: phase `running`, check back in 30s
//!    - **Succeeded**: restart on a new generation, otherwise phase
//!      `stopped` and prune old pods
//!    - **Failed**: wait for a spec change

pub mod finalize;
pub mod pipeline;
pub mod pods;
pub mod poll;
pub mod reconcile;
pub mod state;
pub mod status;
pub mod types;

pub use reconcile::reconcile;
pub use state::{
    decide, deletion_step, destroy_outcome, job_generation, Decision, DeletionStep,
    DestroyOutcome, JobState,
};
pub use types::{Reconciler, ReconcilerError};
