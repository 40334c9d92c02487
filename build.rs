//! Embeds build provenance (`TFOPS_BUILD_DATETIME`, `TFOPS_BUILD_GIT_HASH`) into the
//! controller binary so it can be logged at startup.

use std::process::Command;

fn main() {
    let datetime = std::env::var("TFOPS_BUILD_DATETIME")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string());

    let git_hash = std::env::var("TFOPS_BUILD_GIT_HASH")
        .ok()
        .or_else(short_git_hash)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=TFOPS_BUILD_DATETIME={datetime}");
    println!("cargo:rustc-env=TFOPS_BUILD_GIT_HASH={git_hash}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=TFOPS_BUILD_DATETIME");
    println!("cargo:rerun-if-env-changed=TFOPS_BUILD_GIT_HASH");
}

// Command-line git keeps the build free of libgit2/OpenSSL.
fn short_git_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?.trim().to_string();

    let dirty = Command::new("git")
        .args(["diff", "--quiet"])
        .status()
        .is_ok_and(|status| !status.success());

    Some(if dirty { format!("{hash}-dirty") } else { hash })
}
