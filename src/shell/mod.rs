//! Shell quoting helpers for commands composed for remote hosts.
//!
//! Remote paths frequently begin with `~/`, which must stay outside any
//! quoted literal so the remote shell still expands it. Everything else is
//! quoted via `shell-escape` to survive being embedded in a larger command
//! string.

mod util;

pub use util::expand_tilde;

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Quotes `value` as a single POSIX shell word.
#[must_use]
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Quotes `value` while keeping a leading `~/` (or a bare `~`) unquoted so
/// the remote shell performs home-directory expansion.
///
/// `~/a b/c` becomes `~/'a b/c'`; values without the prefix behave exactly
/// like [`quote`].
#[must_use]
pub fn quote_preserve_tilde(value: &str) -> String {
    if value == "~" {
        return String::from("~");
    }
    value.strip_prefix("~/").map_or_else(
        || quote(value),
        |rest| {
            if rest.is_empty() {
                String::from("~/")
            } else {
                format!("~/{}", quote(rest))
            }
        },
    )
}
