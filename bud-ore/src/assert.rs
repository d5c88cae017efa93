//! Utilities for `assert!`s.

/// Asserts that the provided expression, that returns an `Option`, is `None`.
///
/// Used when inserting into maps where a previous entry indicates a programming error, e.g.
/// registering the same config twice.
#[macro_export]
macro_rules! assert_none {
    ($val:expr, $($msg:tt)+) => {{
        if let Some(prev) = &$val {
            panic!("assertion failed: expected None found Some({prev:?}), {}", format!($($msg)+));
        }
    }};
    ($val:expr) => {{
        if let Some(prev) = &$val {
            panic!("assertion failed: expected None found Some({prev:?})");
        }
    }}
}
