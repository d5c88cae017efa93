//! An in-memory [`FilesObservatory`] for driving builds without touching the disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bud_reactive::testing::Subject;
use parking_lot::Mutex;

use crate::{Files, FilesObservatory, PathFilter, WatchedResource};

/// Files that only exist in memory, changed by hand with [`MemoryFilesObservatory::put`] and
/// [`MemoryFilesObservatory::remove`].
#[derive(Clone, Default)]
pub struct MemoryFilesObservatory {
    files: Arc<Mutex<BTreeSet<PathBuf>>>,
    changes: Subject<PathBuf>,
}

impl MemoryFilesObservatory {
    pub fn new() -> Self {
        MemoryFilesObservatory::default()
    }

    pub fn with_files<P: Into<PathBuf>>(files: impl IntoIterator<Item = P>) -> Self {
        let observatory = MemoryFilesObservatory::new();
        observatory
            .files
            .lock()
            .extend(files.into_iter().map(Into::into));
        observatory
    }

    /// Create or touch `path`, notifying every watcher of it.
    pub fn put(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.files.lock().insert(path.clone());
        self.changes.next(path);
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if self.files.lock().remove(path) {
            self.changes.next(path.to_path_buf());
        }
    }

    /// Number of change streams currently subscribed to.
    pub fn watcher_count(&self) -> usize {
        self.changes.subscriber_count()
    }
}

impl FilesObservatory for MemoryFilesObservatory {
    fn watch_files(&self, paths: &[PathBuf]) -> anyhow::Result<Files> {
        let watched: Arc<BTreeSet<PathBuf>> = Arc::new(paths.iter().cloned().collect());
        let changes = self
            .changes
            .observable()
            .filter(move |path| watched.contains(path));
        Ok(WatchedResource::from_values(paths.to_vec(), changes))
    }

    fn observe_dir(&self, dir: &Path, glob: &str, recursive: bool) -> anyhow::Result<Files> {
        let filter = Arc::new(PathFilter::new(dir, glob, recursive)?);
        let (files, snapshot_filter) = (Arc::clone(&self.files), Arc::clone(&filter));
        let snapshot = move || {
            files
                .lock()
                .iter()
                .filter(|path| snapshot_filter.matches(path))
                .cloned()
                .collect()
        };
        let changes = self
            .changes
            .observable()
            .filter(move |path| filter.matches(path));
        Ok(WatchedResource::new(snapshot, changes))
    }
}

#[cfg(test)]
mod tests {
    use bud_reactive::testing::Recorder;

    use super::*;

    #[test]
    fn observe_dir_follows_puts() {
        let observatory = MemoryFilesObservatory::with_files(["/p/a.cs", "/p/b.txt"]);
        let files = observatory.observe_dir(Path::new("/p"), "*.cs", true).unwrap();
        assert_eq!(files.snapshot(), vec![PathBuf::from("/p/a.cs")]);

        let recorder = Recorder::new();
        let subscription = files.watch().subscribe(recorder.clone());
        observatory.put("/p/c.cs");
        observatory.put("/q/d.cs");

        assert_eq!(recorder.values().len(), 2);
        assert_eq!(files.snapshot().len(), 2);

        subscription.unsubscribe();
        assert_eq!(observatory.watcher_count(), 0);
    }

    #[test]
    fn watch_files_ignores_other_files() {
        let observatory = MemoryFilesObservatory::new();
        let files = observatory
            .watch_files(&[PathBuf::from("/p/Bud.toml")])
            .unwrap();

        let recorder = Recorder::new();
        files.changes().subscribe(recorder.clone());
        observatory.put("/p/other.toml");
        observatory.put("/p/Bud.toml");
        observatory.remove("/p/Bud.toml");

        assert_eq!(
            recorder.values(),
            vec![PathBuf::from("/p/Bud.toml"), PathBuf::from("/p/Bud.toml")]
        );
    }
}
