//! Path-shaped identifiers for configuration values and tasks.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use compact_str::CompactString;

/// Separator between the segments of a [`KeyPath`].
pub const SEPARATOR: char = '/';
/// Segment that refers to the parent scope.
pub const PARENT_SEGMENT: &str = "..";

/// An untyped, slash separated path, e.g. `Output`, `../A/Output`, or `/A/Output`.
///
/// Paths that start with [`SEPARATOR`] are absolute and are never re-qualified by a scope.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath {
    raw: CompactString,
}

impl KeyPath {
    /// Create a [`KeyPath`] from a string that is already normalized.
    ///
    /// Meant for `static` keys, use [`KeyPath::new`] for anything that came from a user.
    pub const fn from_static(raw: &'static str) -> Self {
        KeyPath {
            raw: CompactString::const_new(raw),
        }
    }

    /// Parse and normalize a [`KeyPath`], dropping empty and `.` segments.
    pub fn new(raw: &str) -> Self {
        let absolute = raw.starts_with(SEPARATOR);
        let segments = raw
            .split(SEPARATOR)
            .filter(|segment| !segment.is_empty() && *segment != ".");
        Self::from_segments(absolute, segments)
    }

    /// Build an absolute [`KeyPath`] out of individual segments.
    pub fn absolute<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        Self::from_segments(true, segments)
    }

    fn from_segments<'a>(absolute: bool, segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut raw = CompactString::default();
        for (idx, segment) in segments.into_iter().enumerate() {
            if absolute || idx > 0 {
                raw.push(SEPARATOR);
            }
            raw.push_str(segment);
        }
        if absolute && raw.is_empty() {
            raw.push(SEPARATOR);
        }
        KeyPath { raw }
    }

    /// Returns `prefix/key`, or `key` unchanged if it's absolute.
    pub fn nest(prefix: &KeyPath, key: &KeyPath) -> KeyPath {
        if key.is_absolute() || prefix.raw.is_empty() {
            return key.clone();
        }
        let joined = format!("{}{SEPARATOR}{}", prefix.raw, key.raw);
        KeyPath::new(&joined)
    }

    pub fn is_absolute(&self) -> bool {
        self.raw.starts_with(SEPARATOR)
    }

    /// The individual segments of this path, without the root marker.
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.raw
            .split(SEPARATOR)
            .filter(|segment| !segment.is_empty() && *segment != ".")
    }

    /// The last segment of this path, if any.
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn as_str(&self) -> &str {
        self.raw.as_str()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPath({})", self.raw)
    }
}

impl From<&str> for KeyPath {
    fn from(value: &str) -> Self {
        KeyPath::new(value)
    }
}

/// A [`KeyPath`] tagged with the type of the value it names.
///
/// Equality and hashing only consider the path, the type is part of the contract that gets
/// checked when a key is (re)defined.
pub struct Key<T> {
    path: KeyPath,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Define a key from a `'static`, already normalized, path.
    pub const fn from_static(raw: &'static str) -> Self {
        Key {
            path: KeyPath::from_static(raw),
            _value: PhantomData,
        }
    }

    pub fn new(raw: &str) -> Self {
        Key::from_path(KeyPath::new(raw))
    }

    pub fn from_path(path: KeyPath) -> Self {
        Key {
            path,
            _value: PhantomData,
        }
    }

    /// Returns the key `prefix/key`, e.g. nesting `Output` under `../A` gives `../A/Output`.
    pub fn nest(prefix: &str, key: &Key<T>) -> Key<T> {
        Key::from_path(KeyPath::nest(&KeyPath::new(prefix), &key.path))
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Name of the type this key was declared with.
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Key::from_path(self.path.clone())
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl<T> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key<{}>({})", self.type_name(), self.path)
    }
}
