//! Host-backed file tree for one sandbox.
//!
//! Every operation takes a caller-supplied relative path and routes it
//! through [`path_guard::resolve`] before touching the filesystem. All
//! calls are synchronous; async callers run them on the blocking pool.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SandboxError};
use crate::path_guard;

/// The workspace directory of a single sandbox.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the workspace directory at `path`, creating parents as needed.
    ///
    /// Fails if `path` already exists so that two sandboxes can never share
    /// a directory.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SandboxError::io(parent, e))?;
        }
        fs::create_dir(path).map_err(|e| SandboxError::io(path, e))?;
        let root = path.canonicalize().map_err(|e| SandboxError::io(path, e))?;
        debug!(root = %root.display(), "workspace created");
        Ok(Self { root })
    }

    /// Canonical host path of the workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller path inside this workspace.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        path_guard::resolve(&self.root, path)
    }

    /// Resolve a caller path that must name something below the root.
    fn resolve_entry(&self, path: &str) -> Result<PathBuf> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(SandboxError::Validation(format!(
                "path refers to the workspace root: {path:?}"
            )));
        }
        Ok(resolved)
    }

    /// Recursively list regular files, relative to the workspace root.
    ///
    /// `dir` limits the listing to a subdirectory; `None`, `""` and `"/"`
    /// mean the whole workspace. Entries are `/`-separated and sorted.
    /// Symbolic links are neither listed nor followed.
    pub fn list(&self, dir: Option<&str>) -> Result<Vec<String>> {
        let start = match dir.map(|d| d.trim_matches('/')) {
            None | Some("") => self.root.clone(),
            Some(d) => self.resolve(d)?,
        };
        match fs::metadata(&start) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(not_a_directory(dir)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_a_directory(dir)),
            Err(e) => return Err(SandboxError::io(&start, e)),
        }

        let mut files = Vec::new();
        collect_files(&start, &mut |path| {
            if let Some(rel) = path_guard::relative_to(&self.root, path) {
                files.push(rel);
            }
        })?;
        files.sort();
        Ok(files)
    }

    /// Read a file's contents.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve_entry(path)?;
        if !is_regular_file(&target)? {
            return Err(SandboxError::FileNotFound(path.to_string()));
        }
        fs::read(&target).map_err(|e| SandboxError::io(&target, e))
    }

    /// Create or overwrite a file, creating parent directories as needed.
    pub fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve_entry(path)?;
        if target.is_dir() {
            return Err(SandboxError::Validation(format!(
                "path refers to a directory: {path:?}"
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| SandboxError::io(parent, e))?;
            let real = parent
                .canonicalize()
                .map_err(|e| SandboxError::io(parent, e))?;
            if !real.starts_with(&self.root) {
                return Err(escaped(path));
            }
        }
        write_no_follow(&target, content).map_err(|e| match e.raw_os_error() {
            #[cfg(unix)]
            Some(libc::ELOOP) => escaped(path),
            _ => SandboxError::io(&target, e),
        })?;
        debug!(path = %target.display(), bytes = content.len(), "file written");
        Ok(())
    }

    /// Delete a regular file.
    pub fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve_entry(path)?;
        if !is_regular_file(&target)? {
            return Err(SandboxError::FileNotFound(path.to_string()));
        }
        fs::remove_file(&target).map_err(|e| SandboxError::io(&target, e))?;
        debug!(path = %target.display(), "file deleted");
        Ok(())
    }

    /// Whether `path` names an existing regular file in the workspace.
    pub fn contains_file(&self, path: &str) -> Result<bool> {
        let target = self.resolve_entry(path)?;
        is_regular_file(&target)
    }

    /// Recursively remove the whole workspace. Idempotent.
    pub fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!(root = %self.root.display(), "workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::io(&self.root, e)),
        }
    }
}

fn escaped(path: &str) -> SandboxError {
    SandboxError::Validation(format!("path changed during write: {path:?}"))
}

/// Create or truncate `path` without following a symlink in its final
/// component.
fn write_no_follow(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW);
    }
    let mut file = options.open(path)?;
    file.write_all(content)
}

fn not_a_directory(dir: Option<&str>) -> SandboxError {
    SandboxError::FileNotFound(format!("directory {:?}", dir.unwrap_or("/")))
}

fn is_regular_file(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SandboxError::io(path, e)),
    }
}

fn collect_files(dir: &Path, sink: &mut dyn FnMut(&Path)) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| SandboxError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SandboxError::io(dir, e))?;
        let path = entry.path();
        // DirEntry::file_type does not follow symlinks.
        let file_type = entry.file_type().map_err(|e| SandboxError::io(&path, e))?;
        if file_type.is_dir() {
            collect_files(&path, sink)?;
        } else if file_type.is_file() {
            sink(&path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::create(&tmp.path().join("sandboxes").join("abc")).unwrap();
        (tmp, ws)
    }

    #[test]
    fn test_create_makes_parents_and_refuses_reuse() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/root/abc");
        let ws = Workspace::create(&path).unwrap();
        assert!(ws.root().is_dir());

        let err = Workspace::create(&path).unwrap_err();
        assert!(matches!(err, SandboxError::Io { .. }));
    }

    #[test]
    fn test_write_then_list_sorted() {
        let (_tmp, ws) = workspace();
        ws.write("main.py", b"print('hello')\n").unwrap();
        ws.write("src/util.py", b"").unwrap();
        ws.write("src/a/deep.py", b"").unwrap();
        ws.write("README", b"").unwrap();

        assert_eq!(
            ws.list(None).unwrap(),
            vec!["README", "main.py", "src/a/deep.py", "src/util.py"]
        );
    }

    #[test]
    fn test_list_excludes_empty_directories() {
        let (_tmp, ws) = workspace();
        fs::create_dir_all(ws.root().join("empty/inner")).unwrap();
        assert!(ws.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_list_subdirectory() {
        let (_tmp, ws) = workspace();
        ws.write("main.py", b"").unwrap();
        ws.write("src/util.py", b"").unwrap();

        assert_eq!(ws.list(Some("src")).unwrap(), vec!["src/util.py"]);
        assert_eq!(ws.list(Some("/")).unwrap().len(), 2);
        assert!(matches!(
            ws.list(Some("missing")),
            Err(SandboxError::FileNotFound(_))
        ));
        assert!(matches!(
            ws.list(Some("main.py")),
            Err(SandboxError::FileNotFound(_))
        ));
        assert!(matches!(
            ws.list(Some("../")),
            Err(SandboxError::Validation(_))
        ));
    }

    #[test]
    fn test_write_overwrites() {
        let (_tmp, ws) = workspace();
        ws.write("main.py", b"one").unwrap();
        ws.write("main.py", b"two").unwrap();
        assert_eq!(ws.read("main.py").unwrap(), b"two");
    }

    #[test]
    fn test_write_rejects_escape_and_root() {
        let (_tmp, ws) = workspace();
        assert!(matches!(
            ws.write("../evil.py", b""),
            Err(SandboxError::Validation(_))
        ));
        assert!(matches!(
            ws.write(".", b""),
            Err(SandboxError::Validation(_))
        ));
        assert!(!ws.root().parent().unwrap().join("evil.py").exists());
    }

    #[test]
    fn test_write_onto_directory_is_rejected() {
        let (_tmp, ws) = workspace();
        ws.write("src/a.py", b"").unwrap();
        assert!(matches!(
            ws.write("src", b""),
            Err(SandboxError::Validation(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (_tmp, ws) = workspace();
        ws.write("main.py", b"").unwrap();
        ws.delete("main.py").unwrap();
        assert!(ws.list(None).unwrap().is_empty());

        assert!(matches!(
            ws.delete("main.py"),
            Err(SandboxError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_delete_directory_is_not_found() {
        let (_tmp, ws) = workspace();
        ws.write("src/a.py", b"").unwrap();
        assert!(matches!(
            ws.delete("src"),
            Err(SandboxError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_read_missing() {
        let (_tmp, ws) = workspace();
        assert!(matches!(
            ws.read("nope.py"),
            Err(SandboxError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_contains_file() {
        let (_tmp, ws) = workspace();
        ws.write("main.py", b"").unwrap();
        assert!(ws.contains_file("main.py").unwrap());
        assert!(!ws.contains_file("other.py").unwrap());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (_tmp, ws) = workspace();
        ws.write("src/a.py", b"x").unwrap();
        ws.destroy().unwrap();
        assert!(!ws.root().exists());
        ws.destroy().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_list_skips_symlinks() {
        let (_tmp, ws) = workspace();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.root().join("link")).unwrap();
        ws.write("main.py", b"").unwrap();

        assert_eq!(ws.list(None).unwrap(), vec!["main.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_escaping_symlink_is_rejected() {
        let (_tmp, ws) = workspace();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.root().join("link")).unwrap();

        assert!(matches!(
            ws.write("link/planted.py", b"x"),
            Err(SandboxError::Validation(_))
        ));
        assert!(!outside.path().join("planted.py").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_does_not_follow_final_symlink() {
        let (_tmp, ws) = workspace();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim.txt");
        fs::write(&victim, b"original").unwrap();
        let link = ws.root().join("swapped.py");
        std::os::unix::fs::symlink(&victim, &link).unwrap();

        let err = write_no_follow(&link, b"planted").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ELOOP));
        assert_eq!(fs::read(&victim).unwrap(), b"original");
    }

    #[test]
    fn test_write_truncates_existing_file() {
        let (_tmp, ws) = workspace();
        ws.write("main.py", b"print('a long first version')").unwrap();
        ws.write("main.py", b"print(1)").unwrap();
        assert_eq!(fs::read(ws.root().join("main.py")).unwrap(), b"print(1)");
    }
}
