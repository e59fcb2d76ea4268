// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");

    // Packagers may pin the version string
    let version = match std::env::var("FRAME_PROVIDER_VERSION") {
        Ok(v) => v,
        Err(_) => describe_version(),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `git describe` output with the leading `v` stripped, falling back to the
/// crate version when the build runs outside a checkout.
fn describe_version() -> String {
    Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .map(|v| v.strip_prefix('v').map(str::to_string).unwrap_or(v))
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}
