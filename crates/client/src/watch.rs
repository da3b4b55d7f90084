//! Filesystem watcher adapter
//!
//! Wraps the OS notification backend in a stream of normalized events. Every
//! non-ignored directory is registered individually (non-recursively); new
//! directories are picked up as they appear and removed paths are dropped
//! from the watch set. Rapid write bursts are debounced before delivery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use entangle_core::{paths, PathFilter};
use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Normalized change kinds emitted by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    Create,
    Write,
    Remove,
    Rename,
}

/// One normalized filesystem event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub op: EventOp,
    pub path: PathBuf,
}

/// A running watch over a sync root.
///
/// Owns a dedicated thread that drives the debouncer and maintains the
/// per-directory registrations; consumers pull normalized events with
/// [`Watcher::next`].
pub struct Watcher {
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl Watcher {
    /// Start watching `root` with the given debounce window.
    ///
    /// # Errors
    /// Returns an error if the notification backend cannot be created.
    pub fn spawn(
        root: PathBuf,
        filter: PathFilter,
        debounce: Duration,
    ) -> color_eyre::Result<Self> {
        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let _ = raw_tx.send(events);
                }
                Err(errors) => {
                    for err in errors {
                        error!(%err, "watcher backend error");
                    }
                }
            }
        })?;

        register_tree(&mut debouncer, &root, &filter);

        let (tx, events) = mpsc::unbounded_channel();
        drop(std::thread::spawn(move || {
            while let Ok(batch) = raw_rx.recv() {
                for event in batch {
                    for (op, path) in normalize(&event.kind, &event.paths) {
                        track_registration(&mut debouncer, &root, &filter, op, &path);
                        if tx.send(WatchEvent { op, path }).is_err() {
                            return; // consumer gone
                        }
                    }
                }
            }
        }));

        Ok(Self { events })
    }

    /// Receive the next normalized event.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}

/// Register every non-ignored directory under `root`, non-recursively.
///
/// Per-directory failures are logged and skipped; a directory we cannot
/// watch only costs us events under that directory.
fn register_tree<W: notify::Watcher, C: notify_debouncer_full::FileIdCache>(
    debouncer: &mut notify_debouncer_full::Debouncer<W, C>,
    root: &Path,
    filter: &PathFilter,
) {
    let walk_root = root.to_path_buf();
    let walk_filter = filter.clone();
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let rel = match entry.path().strip_prefix(&walk_root) {
                Ok(rel) => paths::rel_to_wire(rel),
                Err(_) => return true,
            };
            rel.is_empty() || !walk_filter.is_ignored(&rel)
        });

    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                error!(%err, "walk error while registering watches");
                continue;
            }
        };
        if !entry.path().is_dir() {
            continue;
        }
        if let Err(err) = debouncer.watch(entry.path(), RecursiveMode::NonRecursive) {
            error!(path = %entry.path().display(), %err, "failed to watch directory");
        }
    }
}

/// Keep the watch set in step with the tree: new directories are added,
/// removed or renamed paths are dropped.
fn track_registration<W: notify::Watcher, C: notify_debouncer_full::FileIdCache>(
    debouncer: &mut notify_debouncer_full::Debouncer<W, C>,
    root: &Path,
    filter: &PathFilter,
    op: EventOp,
    path: &Path,
) {
    match op {
        EventOp::Create if path.is_dir() => {
            let rel = match path.strip_prefix(root) {
                Ok(rel) => paths::rel_to_wire(rel),
                Err(_) => return,
            };
            if filter.is_ignored(&rel) {
                return;
            }
            if let Err(err) = debouncer.watch(path, RecursiveMode::NonRecursive) {
                warn!(path = %path.display(), %err, "failed to watch new directory");
            }
        }
        EventOp::Remove | EventOp::Rename => {
            // Best-effort: most removed paths were never watched (files).
            if debouncer.unwatch(path).is_ok() {
                debug!(path = %path.display(), "unwatched removed path");
            }
        }
        _ => {}
    }
}

/// Map a raw notification onto normalized events.
///
/// Renames collapse to `Rename` at the old path; the new path surfaces as a
/// fresh `Create`. Access-only kinds are dropped.
fn normalize(kind: &EventKind, event_paths: &[PathBuf]) -> Vec<(EventOp, PathBuf)> {
    let spread = |op: EventOp| {
        event_paths
            .iter()
            .map(|p| (op, p.clone()))
            .collect::<Vec<_>>()
    };

    match kind {
        EventKind::Create(_) => spread(EventOp::Create),
        EventKind::Remove(_) => spread(EventOp::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => spread(EventOp::Create),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = event_paths.first() {
                out.push((EventOp::Rename, from.clone()));
            }
            if let Some(to) = event_paths.get(1) {
                out.push((EventOp::Create, to.clone()));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(_)) => spread(EventOp::Rename),
        EventKind::Modify(_) => spread(EventOp::Write),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn paths_of(strs: &[&str]) -> Vec<PathBuf> {
        strs.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_normalize_create() {
        let out = normalize(
            &EventKind::Create(CreateKind::File),
            &paths_of(&["/r/a.txt"]),
        );
        assert_eq!(out, vec![(EventOp::Create, PathBuf::from("/r/a.txt"))]);
    }

    #[test]
    fn test_normalize_write() {
        let out = normalize(
            &EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &paths_of(&["/r/a.txt"]),
        );
        assert_eq!(out, vec![(EventOp::Write, PathBuf::from("/r/a.txt"))]);
    }

    #[test]
    fn test_normalize_metadata_is_write() {
        let out = normalize(
            &EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
            &paths_of(&["/r/a.txt"]),
        );
        assert_eq!(out, vec![(EventOp::Write, PathBuf::from("/r/a.txt"))]);
    }

    #[test]
    fn test_normalize_remove() {
        let out = normalize(
            &EventKind::Remove(RemoveKind::Any),
            &paths_of(&["/r/gone"]),
        );
        assert_eq!(out, vec![(EventOp::Remove, PathBuf::from("/r/gone"))]);
    }

    #[test]
    fn test_normalize_rename_both_splits() {
        let out = normalize(
            &EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &paths_of(&["/r/old", "/r/new"]),
        );
        assert_eq!(
            out,
            vec![
                (EventOp::Rename, PathBuf::from("/r/old")),
                (EventOp::Create, PathBuf::from("/r/new")),
            ]
        );
    }

    #[test]
    fn test_normalize_rename_to_is_create() {
        let out = normalize(
            &EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &paths_of(&["/r/new"]),
        );
        assert_eq!(out, vec![(EventOp::Create, PathBuf::from("/r/new"))]);
    }

    #[test]
    fn test_normalize_access_dropped() {
        let out = normalize(&EventKind::Access(notify::event::AccessKind::Any), &paths_of(&["/r/a"]));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_watcher_sees_created_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let filter = PathFilter::new("").unwrap();
        let mut watcher = Watcher::spawn(
            dir.path().to_path_buf(),
            filter,
            Duration::from_millis(100),
        )
        .unwrap();

        std::fs::write(dir.path().join("new.txt"), "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .expect("no event within timeout")
            .expect("watcher stream ended");
        assert!(event.path.ends_with("new.txt"));
        assert!(matches!(event.op, EventOp::Create | EventOp::Write));
    }

    #[tokio::test]
    async fn test_watcher_registers_new_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let filter = PathFilter::new("").unwrap();
        let mut watcher = Watcher::spawn(
            dir.path().to_path_buf(),
            filter,
            Duration::from_millis(100),
        )
        .unwrap();

        std::fs::create_dir(dir.path().join("sub")).unwrap();

        // Wait for the directory's own event so the registration happened.
        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .expect("no event within timeout")
            .expect("watcher stream ended");
        assert!(event.path.ends_with("sub"));

        std::fs::write(dir.path().join("sub/inner.txt"), "y").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let event = tokio::time::timeout(remaining, watcher.next())
                .await
                .expect("no event for file in new directory")
                .expect("watcher stream ended");
            if event.path.ends_with("inner.txt") {
                break;
            }
        }
    }
}
