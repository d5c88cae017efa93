//! Types used throughout `bud`.
//!
//! The goal of this crate is to be very lightweight, so take care with adding dependencies.

mod key;
mod scope;
mod timestamped;

pub use key::{Key, KeyPath};
pub use scope::Scope;
pub use timestamped::{Timestamped, modified_time};

/// Errors from resolving a [`KeyPath`] against a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("key '{key}' escapes the root scope when resolved from '{scope}'")]
    EscapesRoot { key: KeyPath, scope: Scope },
    #[error("can not leave the root scope")]
    EmptyScopeStack,
}
