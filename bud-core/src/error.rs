use std::sync::Arc;

use bud_types::{KeyPath, PathError};

/// Errors from defining or evaluating keys and tasks.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// `modify` of a key that has no definition yet.
    #[error("could not modify '{key}', it is not defined yet")]
    Undefined { key: KeyPath },
    /// Redefining a key with a different type than its first definition.
    #[error(
        "could not redefine the type of '{key}' from '{previous}' to '{requested}', \
         redefinition of types is not allowed"
    )]
    TypeOverride {
        key: KeyPath,
        previous: &'static str,
        requested: &'static str,
    },
    /// Reading a key as a different type than it was defined with.
    #[error("'{key}' is a '{defined}', not a '{requested}'")]
    TypeMismatch {
        key: KeyPath,
        defined: &'static str,
        requested: &'static str,
    },
    #[error("'{key}' is not defined")]
    MissingKey { key: KeyPath },
    /// A key that, through its own definition, ended up requiring itself.
    #[error("'{key}' depends on itself: {}", format_chain(.chain))]
    Cycle { key: KeyPath, chain: Vec<KeyPath> },
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// The definition of `key` failed.
    #[error("failed to evaluate '{key}'")]
    Definition {
        key: KeyPath,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
    /// The task `name` failed, possibly while some other task was waiting on it.
    #[error("task '{name}' failed")]
    Task {
        name: KeyPath,
        #[source]
        source: Arc<BuildError>,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_chain(chain: &[KeyPath]) -> String {
    chain
        .iter()
        .map(|key| key.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type BuildResult<T> = Result<T, BuildError>;
