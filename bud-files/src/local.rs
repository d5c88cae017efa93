use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bud_reactive::{Observable, Subscriber};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use walkdir::WalkDir;

use crate::{Files, FilesObservatory, PathFilter, WatchedResource};

/// Observes the local filesystem, with change notifications from the platform's file watcher.
///
/// A watcher is only registered while something is subscribed to the change stream, and is
/// unregistered when that subscription closes.
#[derive(Debug, Default, Clone)]
pub struct LocalFilesObservatory;

impl LocalFilesObservatory {
    pub fn new() -> Self {
        LocalFilesObservatory
    }
}

impl FilesObservatory for LocalFilesObservatory {
    fn watch_files(&self, paths: &[PathBuf]) -> anyhow::Result<Files> {
        // Files might not exist yet, so watch their directories instead.
        let mut targets: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut dirs = BTreeSet::new();
        for path in paths {
            let Some(file_name) = path.file_name() else {
                anyhow::bail!("'{}' does not name a file", path.display());
            };
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let parent = canonical(parent);
            targets.insert(parent.join(file_name), path.clone());
            dirs.insert(parent);
        }

        let targets = Arc::new(targets);
        let dirs: Vec<PathBuf> = dirs.into_iter().collect();
        let changes = Observable::create(move |subscriber: Subscriber<PathBuf>| {
            let targets = Arc::clone(&targets);
            let on_event = move |subscriber: &Subscriber<PathBuf>, path: PathBuf| {
                if let Some(original) = targets.get(&path) {
                    subscriber.next(original.clone());
                }
            };
            let watches = dirs
                .iter()
                .map(|dir| (dir.clone(), RecursiveMode::NonRecursive))
                .collect();
            register(subscriber, watches, on_event);
        });

        Ok(WatchedResource::from_values(paths.to_vec(), changes))
    }

    fn observe_dir(&self, dir: &Path, glob: &str, recursive: bool) -> anyhow::Result<Files> {
        let filter = Arc::new(PathFilter::new(canonical(dir), glob, recursive)?);

        let snapshot_filter = Arc::clone(&filter);
        let snapshot = move || list(&snapshot_filter);

        let changes = Observable::create(move |subscriber: Subscriber<PathBuf>| {
            let filter_ = Arc::clone(&filter);
            let on_event = move |subscriber: &Subscriber<PathBuf>, path: PathBuf| {
                if filter_.matches(&path) {
                    subscriber.next(path);
                }
            };
            let mode = if filter.is_recursive() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            register(subscriber, vec![(filter.root().to_path_buf(), mode)], on_event);
        });

        Ok(WatchedResource::new(snapshot, changes))
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Files currently matching `filter`, sorted.
fn list(filter: &PathFilter) -> Vec<PathBuf> {
    let max_depth = if filter.is_recursive() { usize::MAX } else { 1 };
    WalkDir::new(filter.root())
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::trace!(?err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| filter.matches(path))
        .collect()
}

/// Watch every `(path, mode)` for as long as `subscriber` stays open.
///
/// A path that can't be watched is logged and skipped, it just never reports a change.
fn register(
    subscriber: Subscriber<PathBuf>,
    watches: Vec<(PathBuf, RecursiveMode)>,
    on_event: impl Fn(&Subscriber<PathBuf>, PathBuf) + Send + 'static,
) {
    let downstream = subscriber.clone();
    let handler = move |event: notify::Result<Event>| match event {
        Ok(event) if matches!(event.kind, EventKind::Access(_)) => (),
        Ok(event) => {
            tracing::trace!(?event, "file event");
            for path in event.paths {
                on_event(&downstream, path);
            }
        }
        Err(err) => tracing::warn!(?err, "file watcher error"),
    };

    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(err) => {
            tracing::warn!(?err, "failed to create a file watcher, changes won't be observed");
            return;
        }
    };
    for (path, mode) in &watches {
        match watcher.watch(path, *mode) {
            Ok(()) => tracing::debug!(?path, "watching"),
            Err(err) => tracing::warn!(?path, ?err, "failed to watch, changes won't be observed"),
        }
    }

    subscriber.add_teardown(move || {
        let paths: Vec<_> = watches.into_iter().map(|(path, _)| path).collect();
        tracing::debug!(?paths, "unwatching");
        drop(watcher);
    });
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "content").unwrap();
    }

    fn names(files: &Files, root: &Path) -> Vec<String> {
        let root = canonical(root);
        files
            .snapshot()
            .iter()
            .map(|path| {
                path.strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn observe_dir_lists_matching_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.rs"));
        touch(&dir.path().join("a.rs"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("nested/c.rs"));

        let observatory = LocalFilesObservatory::new();
        let recursive = observatory.observe_dir(dir.path(), "**/*.rs", true).unwrap();
        assert_eq!(
            names(&recursive, dir.path()),
            vec!["a.rs", "b.rs", "nested/c.rs"]
        );

        let shallow = observatory.observe_dir(dir.path(), "*.rs", false).unwrap();
        assert_eq!(names(&shallow, dir.path()), vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn snapshot_is_read_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFilesObservatory::new()
            .observe_dir(dir.path(), "*", true)
            .unwrap();
        assert!(files.snapshot().is_empty());

        touch(&dir.path().join("new.txt"));
        assert_eq!(names(&files, dir.path()), vec!["new.txt"]);
    }

    #[test]
    fn missing_dir_is_empty_and_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFilesObservatory::new()
            .observe_dir(&dir.path().join("missing"), "*", true)
            .unwrap();
        assert!(files.snapshot().is_empty());

        let subscription = files.changes().for_each(|_| ());
        assert!(!subscription.is_closed());
        subscription.unsubscribe();
    }

    #[test]
    fn watch_files_snapshot_is_the_given_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            dir.path().join("Bud.toml"),
            dir.path().join("missing.toml"),
        ];
        let files = LocalFilesObservatory::new().watch_files(&paths).unwrap();
        assert_eq!(files.snapshot(), paths);
    }

    #[test]
    fn notifies_when_a_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFilesObservatory::new()
            .observe_dir(dir.path(), "*.rs", true)
            .unwrap();

        let (tx, rx) = crossbeam::channel::unbounded();
        let subscription = files.changes().for_each(move |path| {
            let _ = tx.send(path);
        });

        touch(&dir.path().join("ignored.txt"));
        touch(&dir.path().join("lib.rs"));

        let changed = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(changed.file_name().unwrap(), "lib.rs");
        subscription.unsubscribe();
    }

    #[test]
    fn watch_files_notifies_for_watched_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("watched.txt");
        let files = LocalFilesObservatory::new()
            .watch_files(std::slice::from_ref(&watched))
            .unwrap();

        let (tx, rx) = crossbeam::channel::unbounded();
        let subscription = files.changes().for_each(move |path| {
            let _ = tx.send(path);
        });

        touch(&dir.path().join("other.txt"));
        touch(&watched);

        let changed = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(changed, watched);
        subscription.unsubscribe();
    }

    #[test]
    fn invalid_glob_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalFilesObservatory::new()
            .observe_dir(dir.path(), "a[", true)
            .is_err());
    }
}
