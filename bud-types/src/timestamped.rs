use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A value paired with the time it was last modified.
///
/// Change detection throughout `bud` compares these timestamps, never file contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Timestamped<T> {
    pub value: T,
    pub timestamp: SystemTime,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, timestamp: SystemTime) -> Self {
        Timestamped { value, timestamp }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timestamped<U> {
        Timestamped {
            value: f(self.value),
            timestamp: self.timestamp,
        }
    }
}

impl Timestamped<PathBuf> {
    /// Stamp `path` with its last modification time.
    ///
    /// Files that don't exist, or whose metadata we can't read, are stamped with the
    /// [`SystemTime::UNIX_EPOCH`] so they're older than anything that does exist.
    pub fn of_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let timestamp = modified_time(&path).unwrap_or(SystemTime::UNIX_EPOCH);
        Timestamped::new(path, timestamp)
    }

    pub fn path(&self) -> &Path {
        &self.value
    }
}

/// Last modification time of `path`, if it exists.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_stamped_with_the_epoch() {
        let stamped = Timestamped::of_file("/surely/this/does/not/exist.txt");
        assert_eq!(stamped.timestamp, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn map_keeps_the_timestamp() {
        let now = SystemTime::now();
        let stamped = Timestamped::new("a", now).map(|v| format!("{v}foo"));
        assert_eq!(stamped.value, "afoo");
        assert_eq!(stamped.timestamp, now);
    }
}
