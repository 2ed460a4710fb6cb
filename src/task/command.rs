//! Remote and local command assembly.
//!
//! Non-interactive SSH sessions do not source shell rc files, so tools
//! installed through rc additions (nvm, bun, pyenv, rustup) would be
//! invisible without the sourcing prefix. The composed body is wrapped in
//! the host's shell with an escaping order that leaves `$` expansion to the
//! inner shell, after the rc files have run rather than before.

use std::collections::BTreeMap;

use crate::host::Host;
use crate::shell::quote_preserve_tilde;

/// Sourcing prefix prepended to every remote command.
const RC_PREFIX: &str =
    "[ -f ~/.bashrc ] && . ~/.bashrc || true; [ -f ~/.zshrc ] && . ~/.zshrc || true; ";

/// Default remote shell invocation, resolved by the remote login shell.
const DEFAULT_REMOTE_SHELL: &str = "${SHELL:-/bin/bash} -c";

/// Builds the single shell string executed on the remote host.
///
/// Layout: rc sourcing, then the host's setup commands, `cd` into the
/// expanded directory, and the env-prefixed user command, all chained with
/// `&&` and wrapped in the host shell.
#[must_use]
pub fn assemble_remote(
    host: &Host,
    remote_dir: &str,
    command: &str,
    env: &BTreeMap<String, String>,
) -> String {
    let mut chain: Vec<String> = Vec::new();
    chain.extend(host.setup_commands.iter().cloned());
    if !remote_dir.is_empty() {
        chain.push(format!("cd {}", quote_preserve_tilde(remote_dir)));
    }
    chain.push(format!("{}{command}", env_exports(env)));

    let body = format!("{RC_PREFIX}{}", chain.join(" && "));
    let shell = host
        .shell
        .as_deref()
        .unwrap_or(DEFAULT_REMOTE_SHELL);
    format!("{shell} \"{}\"", escape_for_double_quotes(&body))
}

/// Builds the body executed by a local `sh -c`; no rc prefix, no wrap.
///
/// The working directory is set on the child process by the caller rather
/// than with `cd`.
#[must_use]
pub fn assemble_local(command: &str, env: &BTreeMap<String, String>) -> String {
    format!("{}{command}", env_exports(env))
}

/// Returns the shell used for local execution.
#[must_use]
pub fn local_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| String::from("/bin/sh"))
}

/// Renders `export k="v"; ` for each entry, in key order.
///
/// Values are double-quoted so variables inside them expand the way the
/// user wrote them; the trailing semicolon keeps the chain independent of
/// each export's success.
fn env_exports(env: &BTreeMap<String, String>) -> String {
    let mut exports = String::new();
    for (key, value) in env {
        exports.push_str(&format!("export {key}=\"{value}\"; "));
    }
    exports
}

/// Escapes a string for embedding between double quotes in an outer shell.
///
/// Order matters: backslashes first, then `"`, `$`, and backtick. The
/// escaped `$` survives the outer shell's quote processing as a literal,
/// so the inner shell expands it after rc sourcing.
fn escape_for_double_quotes(body: &str) -> String {
    body.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
        .replace('`', "\\`")
}
