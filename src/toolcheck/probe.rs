//! Remote PATH probing for a missing tool.
//!
//! Three single-command stages: the login shell, the interactive shell,
//! and a fixed list of common bin directories. The `login \ interactive`
//! difference is what identifies rc-file-only PATH additions, the most
//! common reason a tool works at an interactive prompt but not over SSH.

use crate::exec::{CommandRunner, ExecError, SshClient};

/// Common binary directories checked when the shells cannot find a tool.
pub const COMMON_BIN_DIRS: [&str; 11] = [
    "$HOME/.local/bin",
    "$HOME/.cargo/bin",
    "/opt/homebrew/bin",
    "/opt/homebrew/sbin",
    "$HOME/go/bin",
    "$HOME/.pyenv/shims",
    "/usr/local/bin",
    "/usr/local/go/bin",
    "$HOME/.nvm/current/bin",
    "$HOME/.volta/bin",
    "$HOME/.deno/bin",
];

/// Where a missing tool was (or was not) located on the remote host.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PathProbeResult {
    /// Tool the probe searched for.
    pub command: String,
    /// Whether the login shell resolves the tool.
    pub found_in_login: bool,
    /// Whether the interactive shell resolves the tool.
    pub found_in_inter: bool,
    /// Absolute path reported by the login shell, when found.
    pub login_path: Option<String>,
    /// Absolute path reported by the interactive shell, when found.
    pub inter_path: Option<String>,
    /// Matches from the common-directory scan.
    pub common_paths: Vec<String>,
}

/// Probes the remote host for `tool` in three stages.
///
/// # Errors
///
/// Returns [`ExecError`] only when a probe command cannot be sent at all;
/// a tool that is simply absent yields a result with nothing found.
pub fn probe_path<R: CommandRunner>(
    client: &SshClient<R>,
    tool: &str,
) -> Result<PathProbeResult, ExecError> {
    let login_output = client.exec(&format!("$SHELL -l -c \"command -v {tool} 2>/dev/null\""))?;
    let login_path = first_line(&login_output.stdout);

    let inter_output =
        client.exec(&format!("$SHELL -i -c \"command -v {tool} 2>/dev/null\" 2>/dev/null"))?;
    let inter_path = first_line(&inter_output.stdout);

    let scan = COMMON_BIN_DIRS
        .iter()
        .map(|dir| format!("test -x {dir}/{tool} && echo {dir}/{tool}"))
        .collect::<Vec<_>>()
        .join("; ");
    let common_output = client.exec(&format!("{scan}; true"))?;
    let common_paths = common_output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect();

    Ok(PathProbeResult {
        command: tool.to_owned(),
        found_in_login: login_path.is_some(),
        found_in_inter: inter_path.is_some(),
        login_path,
        inter_path,
        common_paths,
    })
}

fn first_line(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToOwned::to_owned)
}
