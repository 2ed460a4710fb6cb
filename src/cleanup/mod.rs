//! Stale per-branch remote directory cleanup.
//!
//! Discovery expands the host's `${BRANCH}` template into a remote glob and
//! lists matches; a directory is stale when its extracted branch is not in
//! the caller's active set. Removal is allowlisted: only paths that match
//! the template, extract a separator-free branch, and sit at least three
//! segments deep are ever passed to `rm -rf`. A failure on one path never
//! stops the batch.

use thiserror::Error;

use crate::exec::{CommandRunner, ExecError, SshClient};
use crate::shell::quote_preserve_tilde;

/// Placeholder substituted with the branch name in directory templates.
pub const BRANCH_TOKEN: &str = "${BRANCH}";

/// A remote per-branch directory whose branch is no longer active.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StaleDir {
    /// Absolute (or tilde) remote path.
    pub path: String,
    /// Branch name extracted from the path.
    pub branch: String,
    /// Human-readable disk usage, `?` when unknown.
    pub disk_usage: String,
}

/// Errors raised during cleanup.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CleanupError {
    /// Raised when the directory template has no `${BRANCH}` token.
    #[error("directory template does not contain ${{BRANCH}}; nothing to clean")]
    MissingBranchToken,
    /// Raised when the remote listing fails for a reason other than "no
    /// matches".
    #[error("remote listing failed with status {status}: {stderr}")]
    ListFailed {
        /// Exit status of the listing command.
        status: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when a path does not match the branch template.
    #[error("{path} does not match template")]
    DoesNotMatchTemplate {
        /// Offending path.
        path: String,
    },
    /// Raised when the extracted branch contains a path separator.
    #[error("{path}: extracted branch '{branch}' contains a path separator")]
    UnsafeBranch {
        /// Offending path.
        path: String,
        /// Extracted branch.
        branch: String,
    },
    /// Raised when a path is too shallow to delete safely.
    #[error("{path} has fewer than three path segments; refusing to remove")]
    TooShallow {
        /// Offending path.
        path: String,
    },
    /// Raised when `rm -rf` fails for one path.
    #[error("failed to remove {path}: {stderr}")]
    RemoveFailed {
        /// Path that could not be removed.
        path: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when a remote command cannot be sent.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Discovers and removes stale per-branch directories on one host.
pub struct CleanupEngine<'a, R> {
    client: &'a SshClient<R>,
    template: String,
}

impl<'a, R: CommandRunner> CleanupEngine<'a, R> {
    /// Creates an engine for a directory template with `${PROJECT}` already
    /// expanded; `${BRANCH}` stays symbolic.
    pub fn new(client: &'a SshClient<R>, template: impl Into<String>) -> Self {
        Self {
            client,
            template: template.into(),
        }
    }

    /// Lists remote directories matching the template whose branch is not
    /// in `active_branches`.
    ///
    /// Returns an empty list when the template has no `${BRANCH}` token.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError::ListFailed`] when the remote listing fails
    /// for a reason other than "no matches".
    pub fn discover(&self, active_branches: &[String]) -> Result<Vec<StaleDir>, CleanupError> {
        let Some((prefix, suffix)) = self.template.split_once(BRANCH_TOKEN) else {
            return Ok(Vec::new());
        };

        let glob = self.template.replace(BRANCH_TOKEN, "*");
        let listing = self
            .client
            .exec(&format!("ls -d {} 2>/dev/null", quote_glob(&glob)))?;

        if !listing.is_success() {
            let stdout_empty = listing.stdout.trim().is_empty();
            let stderr_text = listing.stderr.trim().to_owned();
            if (stdout_empty && stderr_text.is_empty())
                || stderr_text.contains("no matches found")
            {
                return Ok(Vec::new());
            }
            return Err(CleanupError::ListFailed {
                status: listing
                    .code
                    .map_or_else(|| String::from("unknown"), |code| code.to_string()),
                stderr: stderr_text,
            });
        }

        let mut stale = Vec::new();
        for line in listing.stdout.lines() {
            let path = line.trim();
            if path.is_empty() {
                continue;
            }
            let Some(branch) = extract_branch(path, prefix, suffix) else {
                continue;
            };
            if branch.is_empty() || active_branches.iter().any(|active| *active == branch) {
                continue;
            }
            stale.push(StaleDir {
                path: path.to_owned(),
                branch,
                disk_usage: self.disk_usage(path),
            });
        }
        Ok(stale)
    }

    /// Removes the given directories, validating each against the template
    /// allowlist first. Per-path failures are collected, not fatal.
    pub fn remove(&self, dirs: &[StaleDir]) -> (Vec<String>, Vec<CleanupError>) {
        let mut removed = Vec::new();
        let mut errors = Vec::new();

        for dir in dirs {
            if let Err(err) = self.validate(&dir.path) {
                errors.push(err);
                continue;
            }
            match self
                .client
                .exec(&format!("rm -rf {}", quote_preserve_tilde(&dir.path)))
            {
                Ok(output) if output.is_success() => removed.push(dir.path.clone()),
                Ok(output) => errors.push(CleanupError::RemoveFailed {
                    path: dir.path.clone(),
                    stderr: output.stderr.trim().to_owned(),
                }),
                Err(err) => errors.push(CleanupError::Exec(err)),
            }
        }

        (removed, errors)
    }

    /// Checks a path against the removal allowlist.
    ///
    /// The decision is a pure function of `(path, template)`: the template
    /// must contain `${BRANCH}`, the extracted branch must be non-empty and
    /// separator-free, and the path must have at least three non-empty
    /// segments.
    ///
    /// # Errors
    ///
    /// Returns the specific [`CleanupError`] the path fails on.
    pub fn validate(&self, path: &str) -> Result<String, CleanupError> {
        let Some((prefix, suffix)) = self.template.split_once(BRANCH_TOKEN) else {
            return Err(CleanupError::MissingBranchToken);
        };

        let branch = extract_branch(path, prefix, suffix)
            .filter(|extracted| !extracted.is_empty())
            .ok_or_else(|| CleanupError::DoesNotMatchTemplate {
                path: path.to_owned(),
            })?;

        if branch.contains('/') || branch.contains('\\') {
            return Err(CleanupError::UnsafeBranch {
                path: path.to_owned(),
                branch,
            });
        }

        let segments = path.split('/').filter(|segment| !segment.is_empty()).count();
        if segments < 3 {
            return Err(CleanupError::TooShallow {
                path: path.to_owned(),
            });
        }

        Ok(branch)
    }

    fn disk_usage(&self, path: &str) -> String {
        let result = self
            .client
            .exec(&format!("du -sh {}", quote_preserve_tilde(path)));
        result
            .ok()
            .filter(crate::exec::CommandOutput::is_success)
            .and_then(|output| {
                output
                    .stdout
                    .split_whitespace()
                    .next()
                    .map(ToOwned::to_owned)
            })
            .unwrap_or_else(|| String::from("?"))
    }
}

/// Extracts the branch from `path` using the template's prefix and suffix.
///
/// Tilde templates come back from the remote shell with the home directory
/// expanded, so a `~/`-prefixed template also matches the path by locating
/// the prefix remainder after any leading directory.
fn extract_branch(path: &str, prefix: &str, suffix: &str) -> Option<String> {
    if let Some(rest) = path.strip_prefix(prefix) {
        return rest.strip_suffix(suffix).map(ToOwned::to_owned);
    }

    let stripped = prefix.strip_prefix("~/")?;
    let marker = format!("/{stripped}");
    let start = path.find(&marker)? + marker.len();
    path.get(start..)?
        .strip_suffix(suffix)
        .map(ToOwned::to_owned)
}

/// Quotes a glob by quoting the non-wildcard segments only; a fully quoted
/// glob would never expand on the remote side.
fn quote_glob(glob: &str) -> String {
    glob.split('*')
        .map(|segment| {
            if segment.is_empty() {
                String::new()
            } else {
                quote_preserve_tilde(segment)
            }
        })
        .collect::<Vec<_>>()
        .join("*")
}
