//! Fuzz target for workspace path containment.
//!
//! Run with: cargo +nightly fuzz run fuzz_path_guard
//!
//! Any path that `resolve` accepts must lie under the workspace root.

#![no_main]

use std::path::PathBuf;
use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;

fn root() -> &'static PathBuf {
    static ROOT: OnceLock<PathBuf> = OnceLock::new();
    ROOT.get_or_init(|| {
        let dir = std::env::temp_dir().join("codebox-fuzz-workspace");
        std::fs::create_dir_all(dir.join("sub")).expect("create fuzz workspace");
        dir.canonicalize().expect("canonicalize fuzz workspace")
    })
}

fuzz_target!(|data: &[u8]| {
    if let Ok(path) = std::str::from_utf8(data) {
        let root = root();
        if let Ok(resolved) = codebox_core::path_guard::resolve(root, path) {
            assert!(resolved.starts_with(root), "{path:?} resolved to {resolved:?}");
        }
    }
});
