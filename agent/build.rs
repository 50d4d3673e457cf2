//! Build script for depman
//! Embeds the source revision and build time reported by `depman --version`

use chrono::Utc;
use std::path::Path;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    // Short hash, suffixed with -dirty for uncommitted changes
    let git_hash = git(&["describe", "--always", "--dirty", "--abbrev=8"])
        .unwrap_or_else(|| "unknown".to_string());

    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    // The agent crate sits one level below the repository root
    if let Some(head) = git(&["rev-parse", "--git-path", "HEAD"]) {
        if Path::new(&head).exists() {
            println!("cargo:rerun-if-changed={}", head);
        }
    }
    println!("cargo:rerun-if-changed=build.rs");
}
