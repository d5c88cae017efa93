//! Named asynchronous tasks, with explicit dependencies between them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bud_types::{Key, KeyPath};
use dashmap::DashMap;
use derivative::Derivative;
use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};

use crate::waits::WaitGraph;
use crate::{AnyValue, BuildContext, BuildError, BuildResult, Value};

/// The body of a task returning `T`.
pub type TaskFn<T> = Arc<dyn Fn(Tasker) -> BoxFuture<'static, BuildResult<T>> + Send + Sync>;

type ErasedTaskFn = Arc<dyn Fn(Tasker) -> BoxFuture<'static, BuildResult<AnyValue>> + Send + Sync>;

#[derive(Derivative, Clone)]
#[derivative(Debug)]
struct TaskDefinition {
    type_id: TypeId,
    type_name: &'static str,
    #[derivative(Debug = "ignore")]
    run: ErasedTaskFn,
    /// The [`TaskFn`] itself, so [`Tasks::modify`] can hand it back with its type.
    #[derivative(Debug = "ignore")]
    typed: Arc<dyn Any + Send + Sync>,
}

impl TaskDefinition {
    fn new<T: Value>(task: TaskFn<T>) -> Self {
        let erased = Arc::clone(&task);
        let run: ErasedTaskFn = Arc::new(move |tasker| {
            let fut = erased(tasker);
            async move { fut.await.map(|value| Arc::new(value) as AnyValue) }.boxed()
        });
        TaskDefinition {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            run,
            typed: Arc::new(task),
        }
    }

    fn check_type<T: Value>(&self, name: &KeyPath) -> BuildResult<()> {
        if self.type_id != TypeId::of::<T>() {
            return Err(BuildError::TypeOverride {
                key: name.clone(),
                previous: self.type_name,
                requested: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }
}

/// The definition a task had before it was modified.
pub struct Original<T> {
    name: KeyPath,
    task: TaskFn<T>,
}

impl<T: Value> Original<T> {
    /// Run the original definition. Every call runs it again, nothing is memoized.
    pub fn run(&self, tasker: &Tasker) -> BoxFuture<'static, BuildResult<T>> {
        tracing::debug!(name = %self.name, "running original task");
        (self.task)(tasker.clone())
    }
}

impl<T> Clone for Original<T> {
    fn clone(&self) -> Self {
        Original {
            name: self.name.clone(),
            task: Arc::clone(&self.task),
        }
    }
}

/// An immutable registry of task definitions.
#[derive(Clone, Default, Debug)]
pub struct Tasks {
    definitions: Arc<HashMap<KeyPath, TaskDefinition>>,
    dependencies: Arc<HashMap<KeyPath, Vec<KeyPath>>>,
}

impl Tasks {
    pub fn new() -> Self {
        Tasks::default()
    }

    fn with_definition(&self, name: KeyPath, definition: TaskDefinition) -> Tasks {
        let mut definitions = HashMap::clone(&self.definitions);
        definitions.insert(name, definition);
        Tasks {
            definitions: Arc::new(definitions),
            dependencies: Arc::clone(&self.dependencies),
        }
    }

    /// Define the task `name`, replacing any previous definition of the same type.
    pub fn set<T, F, Fut>(&self, name: &Key<T>, task: F) -> BuildResult<Tasks>
    where
        T: Value,
        F: Fn(Tasker) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BuildResult<T>> + Send + 'static,
    {
        let name = name.path().clone();
        if let Some(previous) = self.definitions.get(&name) {
            previous.check_type::<T>(&name)?;
        }
        let task: TaskFn<T> = Arc::new(move |tasker| task(tasker).boxed());
        Ok(self.with_definition(name, TaskDefinition::new(task)))
    }

    /// Redefine the task `name` in terms of its [`Original`] definition, which the new one can
    /// run any number of times.
    pub fn modify<T, F, Fut>(&self, name: &Key<T>, task: F) -> BuildResult<Tasks>
    where
        T: Value,
        F: Fn(Tasker, Original<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BuildResult<T>> + Send + 'static,
    {
        let name = name.path().clone();
        let Some(previous) = self.definitions.get(&name) else {
            return Err(BuildError::Undefined { key: name });
        };
        previous.check_type::<T>(&name)?;
        let original = Arc::clone(&previous.typed)
            .downcast::<TaskFn<T>>()
            .map_err(|_| BuildError::IllegalState(format!("task '{name}' changed type")))?;
        let original = Original {
            name: name.clone(),
            task: Arc::clone(&*original),
        };

        let task: TaskFn<T> = Arc::new(move |tasker| task(tasker, original.clone()).boxed());
        Ok(self.with_definition(name, TaskDefinition::new(task)))
    }

    /// Run every task in `dependencies` before `name` whenever `name` runs.
    pub fn add_dependencies<'a>(
        &self,
        name: &KeyPath,
        dependencies: impl IntoIterator<Item = &'a KeyPath>,
    ) -> Tasks {
        let mut all = HashMap::clone(&self.dependencies);
        let existing = all.entry(name.clone()).or_default();
        for dependency in dependencies {
            if !existing.contains(dependency) {
                existing.push(dependency.clone());
            }
        }
        Tasks {
            definitions: Arc::clone(&self.definitions),
            dependencies: Arc::new(all),
        }
    }

    /// Registers every task of `other`, later definitions win.
    pub fn extend(&self, other: &Tasks) -> Tasks {
        let mut definitions = HashMap::clone(&self.definitions);
        definitions.extend(other.definitions.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut dependencies = HashMap::clone(&self.dependencies);
        for (name, deps) in other.dependencies.iter() {
            let existing = dependencies.entry(name.clone()).or_default();
            for dep in deps {
                if !existing.contains(dep) {
                    existing.push(dep.clone());
                }
            }
        }
        Tasks {
            definitions: Arc::new(definitions),
            dependencies: Arc::new(dependencies),
        }
    }

    pub fn is_defined(&self, name: &KeyPath) -> bool {
        self.definitions.contains_key(name)
    }

    /// Name of the type the task `name` produces, if it is defined.
    pub fn type_name(&self, name: &KeyPath) -> Option<&'static str> {
        self.definitions.get(name).map(|definition| definition.type_name)
    }

    pub fn dependencies_of(&self, name: &KeyPath) -> &[KeyPath] {
        self.dependencies
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Names of every defined task, sorted.
    pub fn names(&self) -> Vec<KeyPath> {
        let mut names: Vec<_> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }
}

type SharedResult = Shared<BoxFuture<'static, Result<AnyValue, Arc<BuildError>>>>;

/// Runs tasks, every task at most once per [`Tasker`] (and its clones).
#[derive(Clone)]
pub struct Tasker {
    tasks: Tasks,
    ctx: BuildContext,
    results: Arc<DashMap<KeyPath, SharedResult>>,
    /// Running tasks waiting for other tasks, across every call chain.
    waits: Arc<WaitGraph>,
    /// Tasks on the current call chain, most recent last.
    chain: Arc<Vec<KeyPath>>,
    /// Prefix for task names, see [`Tasker::nested`].
    prefix: KeyPath,
}

impl Tasker {
    pub fn new(tasks: Tasks, ctx: BuildContext) -> Self {
        Tasker {
            tasks,
            ctx,
            results: Arc::new(DashMap::new()),
            waits: Arc::default(),
            chain: Arc::new(Vec::new()),
            prefix: KeyPath::new(""),
        }
    }

    /// The compiled configuration tasks can read from.
    pub fn conf(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }

    /// A [`Tasker`] that prefixes relative task names with `prefix`, sharing results.
    pub fn nested(&self, prefix: &str) -> Tasker {
        Tasker {
            prefix: KeyPath::nest(&self.prefix, &KeyPath::new(prefix)),
            ..self.clone()
        }
    }

    /// Run (or wait for) the task `name`.
    pub fn get<T: Value>(&self, name: &Key<T>) -> BoxFuture<'static, BuildResult<T>> {
        let name = KeyPath::nest(&self.prefix, name.path());
        let expected = self.tasks.definitions.get(&name).map(|def| def.type_name);
        let result = self.get_dyn(&name);
        async move {
            let value = result.await?;
            let value: &(dyn Any + Send + Sync) = value.as_ref();
            value
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| BuildError::TypeMismatch {
                    key: name,
                    defined: expected.unwrap_or("<undefined>"),
                    requested: std::any::type_name::<T>(),
                })
        }
        .boxed()
    }

    /// Run (or wait for) the task at `name` without knowing its type.
    pub fn get_dyn(&self, name: &KeyPath) -> BoxFuture<'static, BuildResult<AnyValue>> {
        let name = KeyPath::nest(&self.prefix, name);
        if self.chain.contains(&name) {
            let mut chain = Vec::clone(&self.chain);
            chain.push(name.clone());
            return future::ready(Err(BuildError::Cycle { key: name, chain })).boxed();
        }
        let Some(definition) = self.tasks.definitions.get(&name) else {
            return future::ready(Err(BuildError::MissingKey { key: name })).boxed();
        };

        // Another call chain may be running `name` and waiting for us.
        let waiters: Vec<KeyPath> = self.chain.last().cloned().into_iter().collect();
        if let Err(path) = self.waits.start_waiting(&waiters, &name) {
            let mut chain = Vec::clone(&self.chain);
            chain.extend(path);
            return future::ready(Err(BuildError::Cycle { key: name, chain })).boxed();
        }

        let shared = self
            .results
            .entry(name.clone())
            .or_insert_with(|| self.start(&name, Arc::clone(&definition.run)))
            .clone();

        let waits = Arc::clone(&self.waits);
        async move {
            let result = shared.await;
            waits.stop_waiting(&waiters, &name);
            result.map_err(|source| BuildError::Task { name, source })
        }
        .boxed()
    }

    fn start(&self, name: &KeyPath, run: ErasedTaskFn) -> SharedResult {
        let mut chain = Vec::clone(&self.chain);
        chain.push(name.clone());
        let tasker = Tasker {
            chain: Arc::new(chain),
            prefix: KeyPath::new(""),
            ..self.clone()
        };
        let dependencies = self.tasks.dependencies_of(name).to_vec();
        let name = name.clone();

        async move {
            let pending = dependencies.iter().map(|dep| tasker.get_dyn(dep));
            for result in future::join_all(pending).await {
                result.map_err(Arc::new)?;
            }
            tracing::debug!(%name, "running task");
            run(tasker).await.map_err(Arc::new)
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for Tasker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasker")
            .field("tasks", &self.tasks.names())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::Conf;

    static COMPILE: Key<u32> = Key::from_static("compile");
    static TEST: Key<u32> = Key::from_static("test");
    static NAME: Key<String> = Key::from_static("Name");

    fn tasker(tasks: Tasks) -> Tasker {
        Tasker::new(tasks, Conf::new().to_compiled().unwrap())
    }

    fn root_cause(err: &BuildError) -> &BuildError {
        match err {
            BuildError::Task { source, .. } => root_cause(source),
            err => err,
        }
    }

    #[tokio::test]
    async fn runs_a_task() {
        let tasks = Tasks::new().set(&COMPILE, |_| async { Ok(42) }).unwrap();
        assert_eq!(tasker(tasks).get(&COMPILE).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn tasks_run_once_per_tasker() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_ = Arc::clone(&runs);
        let tasks = Tasks::new()
            .set(&COMPILE, move |_| {
                let runs = Arc::clone(&runs_);
                async move { Ok(runs.fetch_add(1, Ordering::SeqCst) as u32) }
            })
            .unwrap();

        let tasker = tasker(tasks);
        let (a, b) = futures::join!(tasker.get(&COMPILE), tasker.get(&COMPILE));
        assert_eq!((a.unwrap(), b.unwrap()), (0, 0));
        assert_eq!(tasker.get(&COMPILE).await.unwrap(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn modify_can_run_the_original_many_times() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_ = Arc::clone(&runs);
        let tasks = Tasks::new()
            .set(&COMPILE, move |_| {
                let runs = Arc::clone(&runs_);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(20)
                }
            })
            .unwrap()
            .modify(&COMPILE, |tasker, original| async move {
                let first = original.run(&tasker).await?;
                let second = original.run(&tasker).await?;
                Ok(first + second + 2)
            })
            .unwrap();

        assert_eq!(tasker(tasks).get(&COMPILE).await.unwrap(), 42);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn modify_of_undefined_task_fails() {
        let err = Tasks::new()
            .modify(&COMPILE, |tasker, original| async move {
                original.run(&tasker).await
            })
            .unwrap_err();
        assert!(matches!(err, BuildError::Undefined { .. }));
    }

    #[test]
    fn redefining_task_type_fails() {
        let as_string: Key<String> = Key::new("compile");
        let tasks = Tasks::new().set(&COMPILE, |_| async { Ok(1) }).unwrap();

        let err = tasks
            .set(&as_string, |_| async { Ok("one".to_string()) })
            .unwrap_err();
        assert!(matches!(err, BuildError::TypeOverride { .. }));
        assert!(err.to_string().contains("compile"));

        let err = tasks
            .modify(&as_string, |tasker, original| async move {
                original.run(&tasker).await
            })
            .unwrap_err();
        assert!(matches!(err, BuildError::TypeOverride { .. }));
    }

    #[tokio::test]
    async fn dependencies_run_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (log_compile, log_test) = (Arc::clone(&log), Arc::clone(&log));
        let tasks = Tasks::new()
            .set(&COMPILE, move |_| {
                let log = Arc::clone(&log_compile);
                async move {
                    log.lock().push("compile");
                    Ok(1)
                }
            })
            .unwrap()
            .set(&TEST, move |_| {
                let log = Arc::clone(&log_test);
                async move {
                    log.lock().push("test");
                    Ok(2)
                }
            })
            .unwrap()
            .add_dependencies(TEST.path(), [COMPILE.path()]);

        assert_eq!(
            tasks.dependencies_of(TEST.path()),
            &[COMPILE.path().clone()]
        );
        assert_eq!(tasker(tasks).get(&TEST).await.unwrap(), 2);
        assert_eq!(*log.lock(), vec!["compile", "test"]);
    }

    #[tokio::test]
    async fn missing_tasks_are_named() {
        let err = tasker(Tasks::new()).get(&COMPILE).await.unwrap_err();
        assert!(matches!(err, BuildError::MissingKey { .. }));
        assert!(err.to_string().contains("compile"));
    }

    #[tokio::test]
    async fn task_cycles_are_detected() {
        let tasks = Tasks::new()
            .set(&COMPILE, |tasker| async move { tasker.get(&TEST).await })
            .unwrap()
            .set(&TEST, |tasker| async move { tasker.get(&COMPILE).await })
            .unwrap();

        let err = tasker(tasks).get(&COMPILE).await.unwrap_err();
        assert!(matches!(root_cause(&err), BuildError::Cycle { .. }));
    }

    #[tokio::test]
    async fn cycles_started_from_both_ends_fail() {
        let tasks = Tasks::new()
            .set(&COMPILE, |tasker| async move { tasker.get(&TEST).await })
            .unwrap()
            .set(&TEST, |tasker| async move { tasker.get(&COMPILE).await })
            .unwrap();

        let tasker = tasker(tasks);
        let (compile, test) = future::join(tasker.get(&COMPILE), tasker.get(&TEST))
            .now_or_never()
            .expect("a cycle never finished");
        for result in [compile, test] {
            let err = result.unwrap_err();
            assert!(matches!(root_cause(&err), BuildError::Cycle { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn tasks_read_configuration() {
        let ctx = Conf::new()
            .set_value(&NAME, "bud".to_string())
            .to_compiled()
            .unwrap();
        let name_len: Key<usize> = Key::new("name-len");
        let tasks = Tasks::new()
            .set(&name_len, |tasker| async move { Ok(tasker.conf().get(&NAME)?.len()) })
            .unwrap();

        let len = Tasker::new(tasks, ctx).get(&name_len).await;
        assert_eq!(len.unwrap(), 3);
    }

    #[tokio::test]
    async fn nested_taskers_prefix_names() {
        let nested_compile: Key<u32> = Key::new("A/compile");
        let tasks = Tasks::new()
            .set(&nested_compile, |_| async { Ok(7) })
            .unwrap();

        let tasker = tasker(tasks);
        let nested = tasker.nested("A").get(&COMPILE).await;
        assert_eq!(nested.unwrap(), 7);
        assert!(tasker.get(&COMPILE).await.is_err());
    }
}
