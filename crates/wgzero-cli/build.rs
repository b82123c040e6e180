use std::env;
use std::path::Path;
use std::process::Command;

/// `git describe` of the checkout, when building from one.
fn describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (output.status.success() && !rev.is_empty()).then_some(rev)
}

/// Cargo reports custom profiles as `release` in `PROFILE`; the profile name
/// only shows up in the output directory.
fn is_distribute_build() -> bool {
    env::var("OUT_DIR").is_ok_and(|dir| {
        Path::new(&dir)
            .components()
            .any(|c| c.as_os_str() == "distribute")
    })
}

fn main() {
    let package = env!("CARGO_PKG_VERSION");
    let version = match describe() {
        Some(rev) => format!("{package} ({rev})"),
        None => package.to_string(),
    };
    println!("cargo:rustc-env=WGZERO_VERSION={version}");

    println!("cargo::rustc-check-cfg=cfg(distribute)");
    if is_distribute_build() {
        println!("cargo:rustc-cfg=distribute");
    }

    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/refs");
}
