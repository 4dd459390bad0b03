//! Build stamps for the monitor's startup banner
//!
//! Exports BUILD_DATE, BUILD_TIME and GIT_HASH. Each falls back to a
//! placeholder when the tool is missing (tarball builds, minimal CI images).

use std::process::Command;

/// Trimmed stdout of `program args`, or `fallback` if it cannot run
fn stamp(program: &str, args: &[&str], fallback: &str) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn main() {
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        stamp("date", &["+%Y-%m-%d"], "unknown")
    );
    println!(
        "cargo:rustc-env=BUILD_TIME={}",
        stamp("date", &["+%H:%M:%S"], "")
    );
    println!(
        "cargo:rustc-env=GIT_HASH={}",
        stamp("git", &["rev-parse", "--short", "HEAD"], "unknown")
    );

    // a new commit changes GIT_HASH
    println!("cargo:rerun-if-changed=.git/HEAD");
}
