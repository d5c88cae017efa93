use std::path::{Path, PathBuf};

use anyhow::Context;
use globset::{Glob, GlobMatcher};

/// Decides which paths belong to an observed directory.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    matcher: GlobMatcher,
    recursive: bool,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>, glob: &str, recursive: bool) -> anyhow::Result<Self> {
        let matcher = Glob::new(glob)
            .with_context(|| format!("invalid glob '{glob}'"))?
            .compile_matcher();
        Ok(PathFilter {
            root: root.into(),
            matcher,
            recursive,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// True if `path` is under the root, deep enough, and matches the glob.
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        let depth = relative.components().count();
        if depth == 0 || (!self.recursive && depth > 1) {
            return false;
        }
        self.matcher.is_match(relative)
    }
}
