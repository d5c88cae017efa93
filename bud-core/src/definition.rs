use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use bud_types::{KeyPath, Scope};
use derivative::Derivative;

use crate::{AnyValue, BuildContext, BuildError, BuildResult, Value};

pub(crate) type Thunk = Arc<dyn Fn(&BuildContext) -> BuildResult<AnyValue> + Send + Sync>;

/// How to compute the value of a single key.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) struct Definition {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    /// Scope the definition was added in, its body evaluates relative keys against it.
    pub(crate) scope: Scope,
    #[derivative(Debug = "ignore")]
    pub(crate) thunk: Thunk,
}

impl Definition {
    /// A definition whose body runs in a context scoped to `scope`.
    pub(crate) fn new<T: Value>(
        scope: Scope,
        body: impl Fn(&BuildContext) -> BuildResult<T> + Send + Sync + 'static,
    ) -> Self {
        let body_scope = scope.clone();
        let thunk: Thunk = Arc::new(move |ctx: &BuildContext| {
            let ctx = ctx.with_scope(body_scope.clone());
            body(&ctx).map(|value| Arc::new(value) as AnyValue)
        });
        Definition {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            scope,
            thunk,
        }
    }

    pub(crate) fn check_type<T: Value>(&self, key: &KeyPath) -> BuildResult<()> {
        if self.type_id != TypeId::of::<T>() {
            return Err(BuildError::TypeOverride {
                key: key.clone(),
                previous: self.type_name,
                requested: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }
}

/// Every definition of a compiled [`crate::Conf`], keyed by absolute path.
#[derive(Debug, Default)]
pub(crate) struct DefinitionTable {
    definitions: HashMap<KeyPath, Definition>,
}

impl DefinitionTable {
    pub(crate) fn get(&self, key: &KeyPath) -> Option<&Definition> {
        self.definitions.get(key)
    }

    /// Defines `key`, replacing any previous definition of the same type.
    pub(crate) fn set<T: Value>(
        &mut self,
        key: KeyPath,
        definition: Definition,
    ) -> BuildResult<()> {
        if let Some(previous) = self.definitions.get(&key) {
            previous.check_type::<T>(&key)?;
        }
        self.definitions.insert(key, definition);
        Ok(())
    }

    /// Defines `key` only if it isn't defined yet.
    pub(crate) fn init<T: Value>(
        &mut self,
        key: KeyPath,
        definition: impl FnOnce() -> Definition,
    ) -> BuildResult<()> {
        match self.definitions.get(&key) {
            Some(previous) => previous.check_type::<T>(&key),
            None => {
                self.definitions.insert(key, definition());
                Ok(())
            }
        }
    }

    /// Replaces the definition of `key` with one computed from the previous one.
    pub(crate) fn modify<T: Value>(
        &mut self,
        key: KeyPath,
        modify: impl FnOnce(Definition) -> Definition,
    ) -> BuildResult<()> {
        let Some(previous) = self.definitions.remove(&key) else {
            return Err(BuildError::Undefined { key });
        };
        if let Err(err) = previous.check_type::<T>(&key) {
            self.definitions.insert(key, previous);
            return Err(err);
        }
        let modified = modify(previous);
        self.definitions.insert(key, modified);
        Ok(())
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &KeyPath> {
        self.definitions.keys()
    }

    pub(crate) fn len(&self) -> usize {
        self.definitions.len()
    }
}
