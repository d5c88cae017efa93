use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bud_types::{Key, KeyPath, Scope};

use crate::cache::ConfCache;
use crate::definition::DefinitionTable;
use crate::{AnyValue, BuildError, BuildResult, Value};

/// A compiled [`crate::Conf`]: the definition of every key, plus the values computed so far.
///
/// Cloning is cheap and clones share the cache, so a definition can hand the context to
/// another thread and evaluate keys from there.
#[derive(Clone)]
pub struct BuildContext {
    table: Arc<DefinitionTable>,
    cache: Arc<ConfCache>,
    scope: Scope,
    chain: EvalChain,
}

/// Keys currently being evaluated on one logical call chain, most recent first.
#[derive(Clone, Default)]
struct EvalChain {
    head: Option<Arc<ChainLink>>,
}

struct ChainLink {
    key: KeyPath,
    parent: EvalChain,
}

impl EvalChain {
    fn push(&self, key: KeyPath) -> EvalChain {
        EvalChain {
            head: Some(Arc::new(ChainLink {
                key,
                parent: self.clone(),
            })),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &KeyPath> {
        std::iter::successors(self.head.as_deref(), |link| link.parent.head.as_deref())
            .map(|link| &link.key)
    }

    fn contains(&self, key: &KeyPath) -> bool {
        self.iter().any(|k| k == key)
    }
}

impl BuildContext {
    pub(crate) fn new(table: DefinitionTable) -> Self {
        BuildContext {
            table: Arc::new(table),
            cache: Arc::new(ConfCache::default()),
            scope: Scope::root(),
            chain: EvalChain::default(),
        }
    }

    /// Scope relative keys are resolved against.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// This context, but resolving relative keys against `scope`.
    pub fn with_scope(&self, scope: Scope) -> BuildContext {
        BuildContext {
            scope,
            ..self.clone()
        }
    }

    /// This context, but resolving relative keys one scope further down, into `id`.
    pub fn in_scope(&self, id: &str) -> BuildContext {
        self.with_scope(self.scope.child(id))
    }

    /// Evaluate `key`, computing it at most once for this context.
    ///
    /// # Errors
    /// * [`BuildError::MissingKey`] if `key` isn't defined.
    /// * [`BuildError::TypeMismatch`] if `key` was defined with a type other than `T`.
    /// * Whatever the definition of `key` fails with.
    pub fn get<T: Value>(&self, key: &Key<T>) -> BuildResult<T> {
        let path = self.resolve(key.path())?;
        let value = self.get_resolved(&path)?;
        downcast::<T>(&path, &value, self.type_name_of(&path))
    }

    /// Like [`BuildContext::get`], but `Ok(None)` if `key` isn't defined.
    pub fn try_get<T: Value>(&self, key: &Key<T>) -> BuildResult<Option<T>> {
        if !self.is_defined(key.path())? {
            return Ok(None);
        }
        self.get(key).map(Some)
    }

    /// Evaluate the key at `path` without knowing its type, returning `Ok(None)` if it isn't
    /// defined, otherwise the value along with the name of its type.
    pub fn try_get_dyn(&self, path: &KeyPath) -> BuildResult<Option<(AnyValue, &'static str)>> {
        let path = self.resolve(path)?;
        let Some(definition) = self.table.get(&path) else {
            return Ok(None);
        };
        let type_name = definition.type_name;
        Ok(Some((self.get_resolved(&path)?, type_name)))
    }

    pub fn is_defined(&self, path: &KeyPath) -> BuildResult<bool> {
        let path = self.resolve(path)?;
        Ok(self.table.get(&path).is_some())
    }

    /// Absolute paths of every defined key.
    pub fn keys(&self) -> Vec<KeyPath> {
        let mut keys: Vec<_> = self.table.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolve `key` against the current scope.
    pub fn resolve(&self, key: &KeyPath) -> BuildResult<KeyPath> {
        Ok(self.scope.resolve(key)?)
    }

    fn type_name_of(&self, path: &KeyPath) -> &'static str {
        self.table
            .get(path)
            .map(|definition| definition.type_name)
            .unwrap_or("<undefined>")
    }

    fn get_resolved(&self, path: &KeyPath) -> BuildResult<AnyValue> {
        // A context captured by a definition may ask for an ancestor long after it resolved.
        if let Some(value) = self.cache.resolved(path) {
            return Ok(value);
        }

        let mut chain: Vec<KeyPath> = self.chain.iter().cloned().collect();
        chain.reverse();
        if self.chain.contains(path) {
            chain.push(path.clone());
            return Err(BuildError::Cycle {
                key: path.clone(),
                chain,
            });
        }

        let Some(definition) = self.table.get(path) else {
            return Err(BuildError::MissingKey { key: path.clone() });
        };

        self.cache.get_or_compute(path, &chain, || {
            let ctx = BuildContext {
                chain: self.chain.push(path.clone()),
                ..self.clone()
            };
            (definition.thunk)(&ctx).map_err(|err| match err {
                BuildError::Other(source) => BuildError::Definition {
                    key: path.clone(),
                    source,
                },
                err => err,
            })
        })
    }
}

fn downcast<T: Value>(path: &KeyPath, value: &AnyValue, defined: &'static str) -> BuildResult<T> {
    let value: &(dyn Any + Send + Sync) = value.as_ref();
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| BuildError::TypeMismatch {
            key: path.clone(),
            defined,
            requested: std::any::type_name::<T>(),
        })
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("scope", &self.scope)
            .field("definitions", &self.table.len())
            .finish()
    }
}
