use std::fmt;
use std::sync::Arc;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::PathError;
use crate::key::{KeyPath, PARENT_SEGMENT};

/// An immutable path in the tree of scopes, e.g. one scope per project.
///
/// Equality and hashing are structural over the whole chain of ids, so two scopes built
/// independently from the same ids are interchangeable as map keys.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The top of the tree, its parent is itself.
    #[default]
    Root,
    Child(Arc<ScopeNode>),
}

/// A non-root [`Scope`].
#[derive(PartialEq, Eq, Hash)]
pub struct ScopeNode {
    /// Number of ids from the root to this node, compared first since it's cheap.
    depth: usize,
    id: CompactString,
    parent: Scope,
}

impl Scope {
    pub const fn root() -> Scope {
        Scope::Root
    }

    /// Returns a scope with a single id directly under the root.
    pub fn new(id: &str) -> Scope {
        Scope::Root.child(id)
    }

    /// Returns a scope built from ids ordered root first.
    pub fn from_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Scope {
        ids.into_iter().fold(Scope::Root, |scope, id| scope.child(id))
    }

    pub fn child(&self, id: &str) -> Scope {
        Scope::Child(Arc::new(ScopeNode {
            depth: self.depth() + 1,
            id: CompactString::new(id),
            parent: self.clone(),
        }))
    }

    /// The parent of this scope, the root is its own parent.
    pub fn parent(&self) -> Scope {
        match self {
            Scope::Root => Scope::Root,
            Scope::Child(node) => node.parent.clone(),
        }
    }

    /// Like [`Scope::parent`] but fails instead of staying at the root.
    pub fn pop(&self) -> Result<Scope, PathError> {
        match self {
            Scope::Root => Err(PathError::EmptyScopeStack),
            Scope::Child(node) => Ok(node.parent.clone()),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Scope::Root)
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Scope::Root => None,
            Scope::Child(node) => Some(node.id.as_str()),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Scope::Root => 0,
            Scope::Child(node) => node.depth,
        }
    }

    /// All of the ids in this scope, ordered root first.
    pub fn ids(&self) -> SmallVec<[&str; 8]> {
        let mut ids = SmallVec::new();
        let mut scope = self;
        while let Scope::Child(node) = scope {
            ids.push(node.id.as_str());
            scope = &node.parent;
        }
        ids.reverse();
        ids
    }

    /// Mounts `child` underneath `parent`, the root is the identity on either side.
    pub fn concat(parent: &Scope, child: &Scope) -> Scope {
        match (parent, child) {
            (Scope::Root, _) => child.clone(),
            (_, Scope::Root) => parent.clone(),
            (_, Scope::Child(node)) => Scope::concat(parent, &node.parent).child(&node.id),
        }
    }

    /// Resolve `key` into an absolute path, using this scope as the base for relative keys.
    ///
    /// Each `..` segment pops one id off of the base.
    pub fn resolve(&self, key: &KeyPath) -> Result<KeyPath, PathError> {
        let mut segments: SmallVec<[&str; 8]> = if key.is_absolute() {
            SmallVec::new()
        } else {
            self.ids()
        };

        for segment in key.segments() {
            if segment == PARENT_SEGMENT {
                if segments.pop().is_none() {
                    return Err(PathError::EscapesRoot {
                        key: key.clone(),
                        scope: self.clone(),
                    });
                }
            } else {
                segments.push(segment);
            }
        }

        Ok(KeyPath::absolute(segments))
    }

    /// The absolute [`KeyPath`] of this scope itself.
    pub fn to_key_path(&self) -> KeyPath {
        KeyPath::absolute(self.ids())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_path())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({})", self.to_key_path())
    }
}
