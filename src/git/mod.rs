//! Git working-tree introspection for the sync fast path.
//!
//! The sync engine only needs one capability from git: the current branch
//! plus the set of files that differ from a base branch. Everything is
//! obtained by shelling out to the `git` binary through the shared
//! [`CommandRunner`] seam, so the collaborator can be scripted in tests.

use std::collections::BTreeSet;
use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner, ExecError};

/// Branch name plus the files changed relative to a base.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TreeSnapshot {
    /// Current branch name (`HEAD` when detached).
    pub branch: String,
    /// Paths changed relative to the base, sorted and de-duplicated.
    pub changed_files: Vec<String>,
}

/// Errors raised while interrogating the working tree.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GitError {
    /// Raised when the `git` binary cannot be executed.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// Raised when a git command exits non-zero.
    #[error("git {command} failed with status {status_text}: {stderr}")]
    Command {
        /// Subcommand that failed.
        command: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// Capability consumed by the sync engine: changed files relative to a base.
pub trait ChangeSource {
    /// Returns the branch and changed-file set relative to `base`.
    ///
    /// # Errors
    ///
    /// Returns [`GitError`] when the working tree cannot be interrogated.
    fn snapshot(&self, base: &str) -> Result<TreeSnapshot, GitError>;
}

/// Working tree rooted at a local directory.
#[derive(Clone, Debug)]
pub struct WorkingTree<R> {
    root: Utf8PathBuf,
    runner: R,
}

impl<R: CommandRunner> WorkingTree<R> {
    /// Creates a working-tree view rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>, runner: R) -> Self {
        Self {
            root: root.into(),
            runner,
        }
    }

    /// Returns the root directory this view operates on.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the current branch name.
    ///
    /// # Errors
    ///
    /// Returns [`GitError`] when `git rev-parse` fails, for example outside
    /// a repository.
    pub fn current_branch(&self) -> Result<String, GitError> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(output.stdout.trim().to_owned())
    }

    /// Lists local branch names, used to cross-check stale remote dirs.
    ///
    /// # Errors
    ///
    /// Returns [`GitError`] when `git for-each-ref` fails.
    pub fn branch_names(&self) -> Result<Vec<String>, GitError> {
        let output = self.git(&[
            "for-each-ref",
            "--format=%(refname:short)",
            "refs/heads",
        ])?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    fn git(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        let mut full_args = vec![OsString::from("-C"), OsString::from(self.root.as_str())];
        full_args.extend(args.iter().map(OsString::from));

        let output = self.runner.run("git", &full_args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(GitError::Command {
            command: args.join(" "),
            status_text: output
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string()),
            stderr: output.stderr,
        })
    }
}

impl<R: CommandRunner> ChangeSource for WorkingTree<R> {
    fn snapshot(&self, base: &str) -> Result<TreeSnapshot, GitError> {
        let branch = self.current_branch()?;

        // `diff --name-only <base>` covers committed and uncommitted tracked
        // changes; untracked files come from `ls-files`.
        let diff = self.git(&["diff", "--name-only", base])?;
        let untracked = self.git(&["ls-files", "--others", "--exclude-standard"])?;

        let mut files = BTreeSet::new();
        for line in diff.stdout.lines().chain(untracked.stdout.lines()) {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                files.insert(trimmed.to_owned());
            }
        }

        Ok(TreeSnapshot {
            branch,
            changed_files: files.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests;
