//! Missing-tool detection and fix synthesis.
//!
//! Remote stderr is classified against ordered, case-insensitive regex
//! catalogs: direct command-not-found shapes on exit code 127, and indirect
//! failures reported by `make`, `env`, or `/bin/sh`. Only the first
//! matching rule's capture is used. A positive detection is combined with a
//! remote PATH probe to synthesise an actionable suggestion.

mod catalog;
mod probe;

pub use catalog::{ToolInstaller, can_install, describe_install_command, install_command, installer};
pub use probe::{COMMON_BIN_DIRS, PathProbeResult, probe_path};

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::exec::{CommandRunner, SshClient};

/// A command that failed because a tool is missing on the remote host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("'{tool}' not found on {host}")]
pub struct MissingToolError {
    /// Tool that could not be found.
    pub tool: String,
    /// Host the command ran on.
    pub host: String,
    /// PATH probe results, when a client was available.
    pub probe: Option<PathProbeResult>,
    /// Whether the install catalog has an entry for the tool.
    pub can_install: bool,
    /// Ready-to-display remedy.
    pub suggestion: String,
}

/// Shell error shapes that carry the missing tool name on exit 127.
const NOT_FOUND_PATTERNS: [&str; 8] = [
    r"(?i)bash: line \d+: ([^:\s]+): command not found",
    r"(?i)bash: ([^:\s]+): command not found",
    r"(?i)zsh: command not found: (\S+)",
    r"(?i)dash: \d+: ([^:\s]+): not found",
    r"(?i)\bsh: \d+: ([^:\s]+): not found",
    r"(?i)\bsh: ([^:\s]+): not found",
    r"(?i)([^\s:]+): command not found",
    r"(?i)command not found: (\S+)",
];

/// Indirect failure shapes where another tool reports the missing one.
/// Restricted to the `: X: No such file or directory` form so an ordinary
/// `make` failure is never misclassified.
const INDIRECT_PATTERNS: [&str; 5] = [
    r"(?i)make(?:\[\d+\])?: ([^:\s]+): No such file or directory",
    r"(?i)env: '([^']+)': No such file or directory",
    r"(?i)env: ([^:\s]+): No such file or directory",
    r"(?i)/bin/sh: (?:\d+: )?([^:\s]+): not found",
    r"(?i)'([^']+)' is not recognized",
];

fn compiled(patterns: &[&str], cell: &'static OnceLock<Vec<Regex>>) -> &'static [Regex] {
    cell.get_or_init(|| {
        patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

fn not_found_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(&NOT_FOUND_PATTERNS, &RULES)
}

fn indirect_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(&INDIRECT_PATTERNS, &RULES)
}

fn first_capture(rules: &[Regex], stderr: &str) -> Option<String> {
    for rule in rules {
        if let Some(captures) = rule.captures(stderr)
            && let Some(tool) = captures.get(1)
        {
            return Some(tool.as_str().to_owned());
        }
    }
    None
}

fn fallback_tool(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .map_or_else(|| String::from("command"), ToOwned::to_owned)
}

/// Extracts the missing tool name from a failed command, if any.
///
/// Exit code 127 always yields a name: the matched capture, or the
/// command's first token when no shape matches. Other exit codes yield a
/// name only for recognised indirect failures.
#[must_use]
pub fn detect_missing_tool(command: &str, stderr: &str, exit_code: i32) -> Option<String> {
    if exit_code == 127 {
        return Some(
            first_capture(not_found_rules(), stderr)
                .unwrap_or_else(|| fallback_tool(command)),
        );
    }
    first_capture(indirect_rules(), stderr)
}

/// Rewrites absolute home-directory prefixes to `$HOME` for display.
#[must_use]
pub fn rewrite_home(path: &str) -> String {
    for prefix in ["/Users/", "/home/"] {
        if let Some(rest) = path.strip_prefix(prefix)
            && let Some((_user, tail)) = rest.split_once('/')
        {
            return format!("$HOME/{tail}");
        }
    }
    if let Some(tail) = path.strip_prefix("/root/") {
        return format!("$HOME/{tail}");
    }
    if path == "/root" {
        return String::from("$HOME");
    }
    path.to_owned()
}

fn parent_dir(path: &str) -> Option<&str> {
    path.rsplit_once('/')
        .map(|(dir, _)| dir)
        .filter(|dir| !dir.is_empty())
}

fn setup_commands_block(dir: &str) -> String {
    format!("setup_commands:\n  - export PATH={dir}:$PATH")
}

/// Builds the remedy text for a missing tool.
#[must_use]
pub fn build_suggestion(tool: &str, host: &str, probe_result: Option<&PathProbeResult>) -> String {
    if let Some(result) = probe_result {
        if result.found_in_inter && !result.found_in_login {
            if let Some(ref inter_path) = result.inter_path
                && let Some(dir) = parent_dir(inter_path)
            {
                return format!(
                    "'{tool}' is available in interactive shells but not in \
                     non-interactive SSH sessions.\nAdd the directory to PATH in \
                     your host configuration:\n\n{}",
                    setup_commands_block(&rewrite_home(dir))
                );
            }
        }
        if let Some(found) = result.common_paths.first()
            && let Some(dir) = parent_dir(found)
        {
            return format!(
                "'{tool}' was found at {} but is not on the remote PATH.\nAdd the \
                 directory to PATH in your host configuration:\n\n{}",
                rewrite_home(found),
                setup_commands_block(&rewrite_home(dir))
            );
        }
    }

    let install_line = install_command(tool).map_or_else(
        || format!("  1. Install '{tool}' on {host}"),
        |command| {
            format!(
                "  1. Install '{tool}' on {host} using {}",
                describe_install_command(command)
            )
        },
    );
    format!(
        "'{tool}' was not found on {host}. You can:\n{install_line}\n  2. Locate \
         it: run `command -v {tool}` in an interactive shell on the host\n  3. \
         Configure PATH: add an export line to the host's setup_commands"
    )
}

/// Classifies a failed command and synthesises a full diagnostic.
///
/// Returns `None` when the failure does not look like a missing tool. The
/// PATH probe runs only when an SSH client is supplied.
#[must_use]
pub fn diagnose<R: CommandRunner>(
    client: Option<&SshClient<R>>,
    host: &str,
    command: &str,
    stderr: &str,
    exit_code: i32,
) -> Option<MissingToolError> {
    let tool = detect_missing_tool(command, stderr, exit_code)?;
    let probe_result = client.and_then(|ssh| probe_path(ssh, &tool).ok());
    let tool_can_install = can_install(&tool);
    let suggestion = build_suggestion(&tool, host, probe_result.as_ref());

    Some(MissingToolError {
        tool,
        host: host.to_owned(),
        probe: probe_result,
        can_install: tool_can_install,
        suggestion,
    })
}

#[cfg(test)]
mod tests;
