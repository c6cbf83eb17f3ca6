//! Build script for latchd.
//!
//! Sets LATCHD_FIRMWARE_VERSION, the version the device reports while
//! negotiating updates. Release pipelines export it to stamp the image with
//! the registry version it will be uploaded as; otherwise the package version
//! is used.

use std::env;

fn main() {
    let version = env::var("LATCHD_FIRMWARE_VERSION")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string()));

    println!("cargo:rustc-env=LATCHD_FIRMWARE_VERSION={}", version);
    println!("cargo:rerun-if-env-changed=LATCHD_FIRMWARE_VERSION");
}
