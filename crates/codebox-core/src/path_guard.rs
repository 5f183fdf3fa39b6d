//! Containment checks for user-supplied workspace paths.
//!
//! [`resolve`] decides whether a path handed in by a caller stays inside a
//! workspace root once `.`/`..` segments are normalized and symbolic links
//! are followed. It never creates, modifies, or removes anything.

use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SandboxError};

/// Resolve `user_path` against `root`, rejecting anything that lands outside.
///
/// Relative paths are joined to `root`; absolute paths are only accepted if
/// they already lie under `root`. The longest existing prefix of the result
/// is canonicalized so that a symlink planted inside the workspace cannot
/// point outside it. Components that do not exist yet are appended as-is.
///
/// A path that normalizes to the root itself is returned unchanged; callers
/// that need a file must reject it.
pub fn resolve(root: &Path, user_path: &str) -> Result<PathBuf> {
    if user_path.is_empty() {
        return Err(invalid(user_path, "path is empty"));
    }
    if user_path.contains('\0') {
        return Err(invalid(user_path, "path contains a NUL byte"));
    }

    let root = root
        .canonicalize()
        .map_err(|e| SandboxError::io(root, e))?;

    let requested = Path::new(user_path);
    let candidate = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let normalized =
        normalize(&candidate).ok_or_else(|| invalid(user_path, "path escapes the workspace"))?;
    if !normalized.starts_with(&root) {
        return Err(invalid(user_path, "path escapes the workspace"));
    }

    let resolved = follow_links(&normalized).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => invalid(user_path, "path crosses a dangling symbolic link"),
        io::ErrorKind::NotADirectory => invalid(user_path, "a parent component is not a directory"),
        _ => SandboxError::io(&normalized, e),
    })?;
    if !resolved.starts_with(&root) {
        return Err(invalid(
            user_path,
            "symbolic link points outside the workspace",
        ));
    }

    Ok(resolved)
}

/// Render `path` relative to `root` with `/` separators.
///
/// Returns `None` when `path` is not under `root`.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

fn invalid(user_path: &str, reason: &str) -> SandboxError {
    SandboxError::Validation(format!("{reason}: {user_path:?}"))
}

/// Lexically collapse `.` and `..`. `None` if `..` climbs above the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    Some(out)
}

/// Canonicalize the longest existing prefix of an already-normalized path
/// and re-attach the missing tail.
fn follow_links(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut tail: Vec<&OsStr> = Vec::new();

    loop {
        match std::fs::symlink_metadata(existing) {
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                    return Err(e);
                };
                tail.push(name);
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    }

    // Fails with NotFound when `existing` is a dangling symlink.
    let mut resolved = existing.canonicalize()?;
    for name in tail.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
