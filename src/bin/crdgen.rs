//! # CRD Generator
//!
//! Generates the `Terraform` CustomResourceDefinition YAML from the Rust types.
//!
//! ## Usage
//!
//! ```bash
//! # Print to stdout
//! cargo run --bin crdgen > config/crd/terraform.yaml
//!
//! # Write to a file
//! cargo run --bin crdgen -- --output config/crd/terraform.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use kube::core::CustomResourceExt;
use std::path::PathBuf;
use tfops_controller::crd::Terraform;

/// Terraform CRD generator
#[derive(Parser, Debug)]
#[command(name = "crdgen", about = "Print the Terraform CustomResourceDefinition as YAML")]
struct Args {
    /// Write the CRD to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let yaml = serde_yaml::to_string(&Terraform::crd()).context("Failed to serialize CRD to YAML")?;

    match args.output {
        Some(path) => std::fs::write(&path, yaml)
            .with_context(|| format!("Failed to write CRD to {}", path.display()))?,
        None => print!("{yaml}"),
    }
    Ok(())
}
