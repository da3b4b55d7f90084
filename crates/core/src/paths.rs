//! Relative-path normalization for the wire
//!
//! Every path in a message is relative to the sync root, forward-slash
//! separated, never absolute and never containing `..`.

use std::path::{Path, PathBuf};

/// Convert a relative native path to its wire form.
#[must_use]
pub fn rel_to_wire(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert a wire path back to a native relative path.
#[must_use]
pub fn wire_to_rel(wire: &str) -> PathBuf {
    wire.split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_to_wire_joins_components() {
        let rel = Path::new("a").join("b").join("c.txt");
        assert_eq!(rel_to_wire(&rel), "a/b/c.txt");
    }

    #[test]
    fn test_wire_to_rel_roundtrip() {
        let rel = wire_to_rel("sub/dir/file.txt");
        assert_eq!(rel_to_wire(&rel), "sub/dir/file.txt");
    }

    #[test]
    fn test_single_component() {
        assert_eq!(rel_to_wire(Path::new("foo.txt")), "foo.txt");
        assert_eq!(wire_to_rel("foo.txt"), PathBuf::from("foo.txt"));
    }
}
