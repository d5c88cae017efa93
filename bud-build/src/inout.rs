use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bud_types::Timestamped;

/// Files flowing between the stages of a build, each stamped with when it last changed.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct InOut {
    files: Arc<[Timestamped<PathBuf>]>,
}

impl InOut {
    pub fn empty() -> Self {
        InOut::default()
    }

    pub fn new(files: impl IntoIterator<Item = Timestamped<PathBuf>>) -> Self {
        InOut {
            files: files.into_iter().collect(),
        }
    }

    /// Stamp every path with its current modification time.
    pub fn from_paths<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        InOut::new(paths.into_iter().map(Timestamped::of_file))
    }

    /// Concatenation of every part, in order.
    pub fn merge(parts: &[InOut]) -> Self {
        InOut::new(parts.iter().flat_map(|part| part.files.iter().cloned()))
    }

    pub fn files(&self) -> &[Timestamped<PathBuf>] {
        &self.files
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> + '_ {
        self.files.iter().map(Timestamped::path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl fmt::Debug for InOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.paths()).finish()
    }
}

impl fmt::Display for InOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, path) in self.paths().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}
