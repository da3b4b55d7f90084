//! Disk application of replicated operations
//!
//! Both the server's operation processor and the client's inbound handlers
//! mutate their trees through these helpers. Filesystem failures are logged
//! and swallowed: the protocol carries no error frames, and divergence is
//! repaired by the next manifest reconciliation.

use std::path::Path;

use tracing::{debug, error};

use crate::paths::wire_to_rel;
use crate::protocol::{FileOperation, OpKind};

/// Apply one replicated operation under `root`.
pub fn apply_operation(root: &Path, op: &FileOperation) {
    match op.op {
        OpKind::Write => {
            if op.is_dir {
                let full = root.join(wire_to_rel(&op.path));
                if let Err(err) = std::fs::create_dir_all(&full) {
                    error!(path = %full.display(), %err, "failed to create directory");
                }
                return;
            }
            write_file(root, &op.path, op.content.as_deref().unwrap_or_default());
        }
        OpKind::Remove => remove_path(root, &op.path),
    }
}

/// Write full file contents at a wire-relative path, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let full = root.join(wire_to_rel(rel));
    if let Some(parent) = full.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            error!(path = %full.display(), %err, "failed to create parent directories");
            return;
        }
    }
    if let Err(err) = std::fs::write(&full, content) {
        error!(path = %full.display(), %err, "failed to write file");
    }
}

/// Recursively delete whatever exists at a wire-relative path.
///
/// A path that is already gone is not an error.
pub fn remove_path(root: &Path, rel: &str) {
    let full = root.join(wire_to_rel(rel));
    let result = match std::fs::symlink_metadata(&full) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&full),
        Ok(_) => std::fs::remove_file(&full),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %full.display(), "remove target already absent");
            return;
        }
        Err(err) => {
            error!(path = %full.display(), %err, "failed to stat remove target");
            return;
        }
    };
    if let Err(err) = result {
        error!(path = %full.display(), %err, "failed to remove path");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let op = FileOperation::write("a/b/c.txt", b"deep".to_vec());

        apply_operation(dir.path(), &op);

        assert_eq!(
            std::fs::read(dir.path().join("a/b/c.txt")).unwrap(),
            b"deep"
        );
    }

    #[test]
    fn test_apply_write_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let op = FileOperation::write("same.txt", b"twice".to_vec());

        apply_operation(dir.path(), &op);
        apply_operation(dir.path(), &op);

        assert_eq!(std::fs::read(dir.path().join("same.txt")).unwrap(), b"twice");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_apply_mkdir() {
        let dir = TempDir::new().unwrap();
        let op = FileOperation::mkdir("nested/dir");

        apply_operation(dir.path(), &op);

        assert!(dir.path().join("nested/dir").is_dir());
    }

    #[test]
    fn test_apply_remove_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "x").unwrap();

        apply_operation(dir.path(), &FileOperation::remove("gone.txt"));

        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn test_apply_remove_directory_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("d/sub")).unwrap();
        std::fs::write(dir.path().join("d/sub/f.txt"), "x").unwrap();

        apply_operation(dir.path(), &FileOperation::remove("d"));

        assert!(!dir.path().join("d").exists());
    }

    #[test]
    fn test_remove_missing_path_is_silent() {
        let dir = TempDir::new().unwrap();
        // Must not panic or create anything.
        apply_operation(dir.path(), &FileOperation::remove("never/existed"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_overwrites_existing_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old").unwrap();

        write_file(dir.path(), "f.txt", b"new");

        assert_eq!(std::fs::read(dir.path().join("f.txt")).unwrap(), b"new");
    }
}
