//! Utilities for reading environment variables.

use std::ffi::OsStr;

/// Returns true if the environment variable is set, and is _not_ one of the following:
/// `'0', '', 'no', 'false'`.
pub fn is_truthy<K: AsRef<OsStr>>(var: K) -> bool {
    static FALSEY: &[&str] = &["0", "", "no", "false"];

    let Some(mut value) = std::env::var_os(var) else {
        return false;
    };
    value.make_ascii_lowercase();

    !FALSEY.iter().any(|falsey| value == *falsey)
}

/// Name of the environment variable that overrides the tool config `name`.
///
/// e.g. `calming_period` maps to `BUD_CALMING_PERIOD`.
pub fn config_var(name: &str) -> String {
    format!("BUD_{}", name.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_var_is_prefixed_and_uppercased() {
        assert_eq!(config_var("build_filename"), "BUD_BUILD_FILENAME");
    }

    #[test]
    fn unset_is_not_truthy() {
        assert!(!is_truthy("BUD_ORE_TEST_SURELY_NOT_SET_ANYWHERE"));
    }
}
