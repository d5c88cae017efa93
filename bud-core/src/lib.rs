//! Scoped, typed configuration of a build, and lazy memoized evaluation of it.
//!
//! A build description assembles a [`Conf`] out of instructions (`set`, `init`, `modify`)
//! for [`Key`]s, mounting pieces of it in [`Scope`]s, e.g. one per project. Compiling the
//! [`Conf`] yields a [`BuildContext`] that evaluates keys on demand, each at most once.
//!
//! [`Tasks`] are named asynchronous units of work run by a [`Tasker`], which can read from a
//! [`BuildContext`].

use std::any::Any;
use std::sync::Arc;

mod cache;
mod conf;
mod context;
mod definition;
mod error;
mod tasks;
mod waits;

pub use bud_types::{Key, KeyPath, Scope};
pub use conf::Conf;
pub use context::BuildContext;
pub use error::{BuildError, BuildResult};
pub use tasks::{Original, TaskFn, Tasker, Tasks};

/// Values that can be stored in a [`BuildContext`].
///
/// Values are handed out by clone, so expensive ones should be wrapped in an [`Arc`].
pub trait Value: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Value for T {}

/// A type erased [`Value`].
pub type AnyValue = Arc<dyn Any + Send + Sync>;
