//! Utilities for reading environment variables.

use std::ffi::OsStr;
use std::io::IsTerminal;

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

/// Whether ANSI styling should be used when writing to stderr.
///
/// See: <https://no-color.org/>.
pub fn stderr_supports_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if is_truthy("FORCE_COLOR") {
        return true;
    }
    std::io::stderr().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_is_not_truthy() {
        assert!(!is_truthy("ESB_ORE_TEST_DEFINITELY_NOT_SET"));
    }
}
