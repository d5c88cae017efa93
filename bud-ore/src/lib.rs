//! Odds and ends shared by every `bud` crate.
//!
//! Anything in here should be small and dependency free, if it grows a real concern it
//! deserves its own crate.

pub mod assert;
pub mod env;
pub mod hash;
