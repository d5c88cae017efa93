use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bud_types::{Key, KeyPath, Scope};

use crate::definition::{Definition, DefinitionTable};
use crate::{BuildContext, BuildError, BuildResult, Value};

type Apply = Arc<dyn Fn(&mut DefinitionTable, &Scope) -> BuildResult<()> + Send + Sync>;

/// An immutable, composable list of instructions for defining keys.
///
/// Every method returns a new [`Conf`], nothing is evaluated until the [`Conf`] is compiled
/// with [`Conf::to_compiled`].
#[derive(Clone, Default)]
pub struct Conf {
    instructions: Arc<Vec<ScopedInstruction>>,
    /// Scope new instructions get added in.
    scope: Scope,
}

#[derive(Clone)]
struct ScopedInstruction {
    scope: Scope,
    instruction: Instruction,
}

#[derive(Clone)]
enum Instruction {
    Apply { key: KeyPath, apply: Apply },
    Nested(Conf),
}

impl Conf {
    pub fn new() -> Self {
        Conf::default()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn push(&self, instruction: Instruction) -> Conf {
        let mut instructions = Vec::with_capacity(self.instructions.len() + 1);
        instructions.extend(self.instructions.iter().cloned());
        instructions.push(ScopedInstruction {
            scope: self.scope.clone(),
            instruction,
        });
        Conf {
            instructions: Arc::new(instructions),
            scope: self.scope.clone(),
        }
    }

    fn apply(
        &self,
        key: &KeyPath,
        apply: impl Fn(&mut DefinitionTable, KeyPath, &Scope) -> BuildResult<()>
        + Send
        + Sync
        + 'static,
    ) -> Conf {
        let relative = key.clone();
        let apply: Apply = Arc::new(move |table: &mut DefinitionTable, scope: &Scope| {
            let key = scope.resolve(&relative)?;
            apply(table, key, scope)
        });
        self.push(Instruction::Apply {
            key: key.clone(),
            apply,
        })
    }

    /// Define `key` as `value`, replacing any previous definition.
    pub fn set_value<T: Value>(&self, key: &Key<T>, value: T) -> Conf {
        self.set(key, move |_| Ok(value.clone()))
    }

    /// Define `key` as the result of `body`, replacing any previous definition.
    pub fn set<T: Value>(
        &self,
        key: &Key<T>,
        body: impl Fn(&BuildContext) -> BuildResult<T> + Send + Sync + 'static,
    ) -> Conf {
        let body = Arc::new(body);
        self.apply(key.path(), move |table, key, scope| {
            let body = Arc::clone(&body);
            let definition = Definition::new(scope.clone(), move |ctx| body(ctx));
            table.set::<T>(key, definition)
        })
    }

    /// Define `key` as `value` unless it's already defined.
    pub fn init_value<T: Value>(&self, key: &Key<T>, value: T) -> Conf {
        self.init(key, move |_| Ok(value.clone()))
    }

    /// Define `key` as the result of `body` unless it's already defined.
    pub fn init<T: Value>(
        &self,
        key: &Key<T>,
        body: impl Fn(&BuildContext) -> BuildResult<T> + Send + Sync + 'static,
    ) -> Conf {
        let body = Arc::new(body);
        self.apply(key.path(), move |table, key, scope| {
            let body = Arc::clone(&body);
            table.init::<T>(key, || {
                Definition::new(scope.clone(), move |ctx| body(ctx))
            })
        })
    }

    /// Redefine `key` in terms of its previous value.
    ///
    /// Compiling fails with [`BuildError::Undefined`] if `key` wasn't defined before.
    pub fn modify<T: Value>(
        &self,
        key: &Key<T>,
        body: impl Fn(&BuildContext, T) -> BuildResult<T> + Send + Sync + 'static,
    ) -> Conf {
        let body = Arc::new(body);
        self.apply(key.path(), move |table, key, scope| {
            let body = Arc::clone(&body);
            let path = key.clone();
            table.modify::<T>(key, |previous| {
                Definition::new(scope.clone(), move |ctx| {
                    let previous = (previous.thunk)(ctx)?;
                    let previous: &(dyn Any + Send + Sync) = previous.as_ref();
                    let previous = previous.downcast_ref::<T>().cloned().ok_or_else(|| {
                        BuildError::IllegalState(format!("previous value of '{path}' changed type"))
                    })?;
                    body(ctx, previous)
                })
            })
        })
    }

    /// Append `items` to the list defined by `key`.
    pub fn add_to<E: Value>(&self, key: &Key<Vec<E>>, items: impl IntoIterator<Item = E>) -> Conf {
        let items: Vec<E> = items.into_iter().collect();
        self.modify(key, move |_, mut existing| {
            existing.extend(items.iter().cloned());
            Ok(existing)
        })
    }

    /// Mount `other` at the current scope of this [`Conf`].
    ///
    /// Relative keys in `other` stay relative to where it's mounted.
    pub fn add(&self, other: &Conf) -> Conf {
        self.push(Instruction::Nested(other.clone()))
    }

    pub fn add_all<'a>(&self, others: impl IntoIterator<Item = &'a Conf>) -> Conf {
        others.into_iter().fold(self.clone(), |conf, other| conf.add(other))
    }

    /// Add subsequent instructions one scope further down, into `id`.
    pub fn in_scope(&self, id: &str) -> Conf {
        Conf {
            instructions: Arc::clone(&self.instructions),
            scope: self.scope.child(id),
        }
    }

    /// Undo the most recent [`Conf::in_scope`].
    ///
    /// # Errors
    /// * If this [`Conf`] is at the root scope.
    pub fn out_scope(&self) -> BuildResult<Conf> {
        let scope = self
            .scope
            .pop()
            .map_err(|_| BuildError::IllegalState("can not leave the root scope".to_string()))?;
        Ok(Conf {
            instructions: Arc::clone(&self.instructions),
            scope,
        })
    }

    /// Apply every instruction, in order, producing a [`BuildContext`] with an empty cache.
    pub fn to_compiled(&self) -> BuildResult<BuildContext> {
        let mut table = DefinitionTable::default();
        self.apply_to(&mut table, &Scope::root())?;
        tracing::debug!(definitions = table.len(), "compiled configuration");
        Ok(BuildContext::new(table))
    }

    fn apply_to(&self, table: &mut DefinitionTable, outer: &Scope) -> BuildResult<()> {
        for ScopedInstruction { scope, instruction } in self.instructions.iter() {
            let scope = Scope::concat(outer, scope);
            match instruction {
                Instruction::Apply { key, apply } => {
                    tracing::trace!(%key, %scope, "applying instruction");
                    apply(table, &scope)?;
                }
                Instruction::Nested(conf) => conf.apply_to(table, &scope)?,
            }
        }
        Ok(())
    }

    /// Compile and evaluate `key`, the compiled context is thrown away afterwards.
    pub fn get<T: Value>(&self, key: &Key<T>) -> BuildResult<T> {
        self.to_compiled()?.get(key)
    }

    pub fn try_get<T: Value>(&self, key: &Key<T>) -> BuildResult<Option<T>> {
        self.to_compiled()?.try_get(key)
    }
}

impl fmt::Debug for Conf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conf")
            .field("instructions", &self.instructions.len())
            .field("scope", &self.scope)
            .finish()
    }
}
