//! Files a build reads, and notifications of when they change.
//!
//! A [`FilesObservatory`] hands out [`Files`], a [`WatchedResource`] of paths: reading its
//! snapshot lists the files right now, watching it produces the same resource again every time
//! one of them changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bud_types::Timestamped;

mod filter;
mod local;
pub mod testing;
mod watched;

pub use filter::PathFilter;
pub use local::LocalFilesObservatory;
pub use watched::WatchedResource;

/// A watched collection of file paths.
pub type Files = WatchedResource<PathBuf>;

impl WatchedResource<PathBuf> {
    /// The current files, each with its last modification time.
    pub fn timestamped(&self) -> Vec<Timestamped<PathBuf>> {
        self.snapshot()
            .into_iter()
            .map(Timestamped::of_file)
            .collect()
    }
}

/// Supplies [`Files`] for explicit paths or directories.
pub trait FilesObservatory: Send + Sync + 'static {
    /// Exactly `paths`, changing whenever one of them does.
    fn watch_files(&self, paths: &[PathBuf]) -> anyhow::Result<Files>;

    /// Every file under `dir` whose path relative to `dir` matches `glob`.
    ///
    /// Only direct children of `dir` are considered unless `recursive` is set.
    fn observe_dir(&self, dir: &Path, glob: &str, recursive: bool) -> anyhow::Result<Files>;
}

pub type FilesObservatoryRef = Arc<dyn FilesObservatory>;
