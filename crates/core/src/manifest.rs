//! Manifest: path-to-hash snapshot of a directory tree

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::filter::PathFilter;
use crate::hash::ContentHash;
use crate::paths::rel_to_wire;

/// A snapshot mapping each non-ignored regular file to its content hash.
///
/// Keys are wire-form relative paths, values lowercase hex SHA-256. Built on
/// demand, never persisted. Serializes as `{"files": {...}}`, which is also
/// the `manifest` message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// All files in the snapshot, keyed by relative path
    pub files: BTreeMap<String, String>,
}

impl Manifest {
    /// Walk `root` and hash every non-ignored regular file.
    ///
    /// Ignored directories prune the descent; ignored files are skipped.
    /// A file that fails to hash is logged and omitted without aborting
    /// the walk.
    ///
    /// # Errors
    /// Returns an error if the walk itself fails (e.g. an unreadable
    /// directory).
    pub fn build(root: &Path, filter: &PathFilter) -> color_eyre::Result<Self> {
        let mut files = BTreeMap::new();

        let walk_root: PathBuf = root.to_path_buf();
        let walk_filter = filter.clone();
        let mut builder = WalkBuilder::new(root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let rel = match entry.path().strip_prefix(&walk_root) {
                    Ok(rel) => rel_to_wire(rel),
                    Err(_) => return true,
                };
                rel.is_empty() || !walk_filter.is_ignored(&rel)
            });

        for result in builder.build() {
            let entry = result?;
            let path = entry.path();

            if !path.is_file() {
                continue;
            }

            let rel = rel_to_wire(path.strip_prefix(root)?);
            match ContentHash::from_file(path) {
                Ok(hash) => {
                    let _ = files.insert(rel, hash.to_hex());
                }
                Err(err) => {
                    error!(path = %path.display(), %err, "failed to hash file, omitting from manifest");
                }
            }
        }

        Ok(Self { files })
    }

    /// Get the number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Plan a reconciliation of `local` against `server`.
    ///
    /// Paths the server has that are missing or different locally go in
    /// `to_request`; local paths absent from the server go in `to_delete`.
    /// Both lists come out sorted.
    #[must_use]
    pub fn diff(local: &Self, server: &Self) -> ReconcilePlan {
        let mut to_request = Vec::new();
        let mut to_delete = Vec::new();

        for (path, server_hash) in &server.files {
            if local.files.get(path) != Some(server_hash) {
                to_request.push(path.clone());
            }
        }

        for path in local.files.keys() {
            if !server.files.contains_key(path) {
                to_delete.push(path.clone());
            }
        }

        ReconcilePlan {
            to_request,
            to_delete,
        }
    }
}

/// The actions needed to make a local tree match a server manifest
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    /// Paths to fetch from the server
    pub to_request: Vec<String>,
    /// Local paths to delete
    pub to_delete: Vec<String>,
}

impl ReconcilePlan {
    /// Check if the trees already agree
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_request.is_empty() && self.to_delete.is_empty()
    }
}
