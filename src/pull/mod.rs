//! Reverse rsync: pulls result artifacts from the remote to local
//! destinations.
//!
//! Items are grouped by their effective destination and one rsync runs per
//! group, in sorted destination order. Pull never deletes local files, so
//! the argv carries neither `--delete` nor `--force`.

use std::collections::BTreeMap;
use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::exec::{CommandRunner, ExecError};
use crate::host::Connection;
use crate::output::CappedBuffer;
use crate::sync::ProgressSink;

/// Reborrows an optional progress sink with a lifetime tied to `sink` itself
/// rather than to the caller's original borrow, so it can be called once per
/// loop iteration.
fn reborrow_sink<'a>(
    sink: &'a mut Option<&mut dyn ProgressSink>,
) -> Option<&'a mut dyn ProgressSink> {
    match sink {
        Some(progress_sink) => Some(&mut **progress_sink),
        None => None,
    }
}

/// One artifact pull: a remote pattern and an optional local destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PullItem {
    /// Remote pattern relative to the expanded host directory.
    pub src: String,
    /// Local destination directory; empty or absent means the default.
    pub dest: Option<String>,
}

/// Errors surfaced while pulling artifacts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PullError {
    /// Raised when a local destination directory cannot be created.
    #[error("failed to create destination {dest}: {message}")]
    DestinationPrep {
        /// Destination that could not be prepared.
        dest: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a remote pattern matched nothing.
    #[error("remote file or pattern not found: {stderr}")]
    RemoteNotFound {
        /// Captured stderr naming the missing pattern.
        stderr: String,
    },
    /// Raised when rsync exits non-zero for other reasons.
    #[error("{reason} (rsync exit code {code}): {stderr}")]
    RsyncFailed {
        /// Rsync exit code.
        code: i32,
        /// Short description of the exit code.
        reason: &'static str,
        /// Captured stderr, bounded.
        stderr: String,
    },
    /// Raised when rsync terminates without an exit status.
    #[error("rsync terminated without an exit status")]
    MissingExitCode,
    /// Raised when the connection has already been closed.
    #[error("connection to {host} is closed")]
    ConnectionClosed {
        /// Host the closed connection belonged to.
        host: String,
    },
    /// Raised when a command cannot be spawned or streamed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Bytes of rsync stderr retained for diagnostics.
const STDERR_CAP: usize = 4096;

/// Pulls artifact groups from a remote host via rsync.
#[derive(Clone, Debug)]
pub struct Puller<R> {
    rsync_bin: String,
    ssh_config_file: Option<String>,
    default_dest: Option<String>,
    runner: R,
}

impl<R: CommandRunner> Puller<R> {
    /// Creates a puller using the provided runner.
    pub fn new(runner: R) -> Self {
        Self {
            rsync_bin: String::from("rsync"),
            ssh_config_file: None,
            default_dest: None,
            runner,
        }
    }

    /// Overrides the SSH configuration file forwarded to rsync's transport.
    #[must_use]
    pub fn with_ssh_config_file(mut self, config_file: Option<String>) -> Self {
        self.ssh_config_file = config_file;
        self
    }

    /// Sets the destination used by items without one. Defaults to `.`.
    #[must_use]
    pub fn with_default_dest(mut self, dest: Option<String>) -> Self {
        self.default_dest = dest;
        self
    }

    /// Pulls every item, one rsync per destination group.
    ///
    /// Local connections are a no-op: the artifacts are already here.
    /// Without a progress sink, stdout is discarded to avoid unbounded
    /// buffering; stderr is always captured.
    ///
    /// # Errors
    ///
    /// Returns [`PullError`] for the first group that fails; earlier groups
    /// stay pulled.
    pub fn pull(
        &self,
        connection: &Connection<R>,
        remote_dir: &str,
        items: &[PullItem],
        mut sink: Option<&mut dyn ProgressSink>,
    ) -> Result<(), PullError> {
        if connection.is_local() || items.is_empty() {
            return Ok(());
        }
        if connection.client().is_none() {
            return Err(PullError::ConnectionClosed {
                host: connection.name().to_owned(),
            });
        }

        let control_dir = crate::sync::ensure_control_dir();
        for (dest, sources) in self.group_items(items) {
            let prepared = prepare_destination(&dest)?;
            let args = self.group_args(
                connection,
                remote_dir,
                &sources,
                &prepared,
                control_dir.as_deref(),
            );
            self.run_rsync(&args, reborrow_sink(&mut sink))?;
        }
        Ok(())
    }

    /// Groups items by effective destination, sorted by destination.
    ///
    /// Sources keep their declared order inside each group.
    fn group_items(&self, items: &[PullItem]) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for item in items {
            let dest = item
                .dest
                .as_deref()
                .filter(|dest| !dest.trim().is_empty())
                .map_or_else(|| self.effective_default(), ToOwned::to_owned);
            groups.entry(dest).or_default().push(item.src.clone());
        }
        groups
    }

    fn effective_default(&self) -> String {
        self.default_dest
            .as_deref()
            .filter(|dest| !dest.trim().is_empty())
            .map_or_else(|| String::from("."), ToOwned::to_owned)
    }

    fn group_args(
        &self,
        connection: &Connection<R>,
        remote_dir: &str,
        sources: &[String],
        dest: &Utf8Path,
        control_dir: Option<&Utf8Path>,
    ) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-az"),
            OsString::from("--info=progress2"),
            OsString::from("-e"),
            OsString::from(self.transport(control_dir)),
        ];
        let remote_base = remote_dir.trim_end_matches('/');
        for source in sources {
            args.push(OsString::from(format!(
                "{}:{remote_base}/{source}",
                connection.alias()
            )));
        }
        let dest_text = dest.as_str();
        if dest_text == "." {
            args.push(OsString::from("."));
        } else {
            args.push(OsString::from(format!(
                "{}/",
                dest_text.trim_end_matches('/')
            )));
        }
        args
    }

    fn transport(&self, control_dir: Option<&Utf8Path>) -> String {
        let mut parts = vec![String::from("ssh"), String::from("-o ControlMaster=auto")];
        if let Some(dir) = control_dir {
            parts.push(format!("-o ControlPath={dir}/%h-%p"));
        }
        parts.push(String::from("-o ControlPersist=60"));
        parts.push(String::from("-o BatchMode=yes"));
        if let Some(ref config_file) = self.ssh_config_file {
            parts.push(format!("-F {config_file}"));
        }
        parts.join(" ")
    }

    fn run_rsync(
        &self,
        args: &[OsString],
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<(), PullError> {
        let mut stderr_cap = CappedBuffer::new(STDERR_CAP);
        let code = match sink {
            Some(progress_sink) => {
                let mut splitter = crate::sync::LineSplitter::new(progress_sink);
                self.runner
                    .run_streaming(&self.rsync_bin, args, None, &mut splitter, &mut stderr_cap)?
            }
            None => {
                let mut discard = crate::sync::DiscardWriter;
                self.runner
                    .run_streaming(&self.rsync_bin, args, None, &mut discard, &mut stderr_cap)?
            }
        };

        match code {
            Some(0) => Ok(()),
            Some(nonzero) => Err(classify_pull_failure(nonzero, &stderr_cap.contents())),
            None => Err(PullError::MissingExitCode),
        }
    }
}

fn classify_pull_failure(code: i32, stderr: &str) -> PullError {
    if stderr.contains("No such file or directory") {
        return PullError::RemoteNotFound {
            stderr: stderr.trim().to_owned(),
        };
    }
    PullError::RsyncFailed {
        code,
        reason: crate::sync::describe_exit(code),
        stderr: stderr.trim().to_owned(),
    }
}

/// Normalises and creates a local destination directory.
fn prepare_destination(dest: &str) -> Result<Utf8PathBuf, PullError> {
    let cleaned = if dest == "." {
        Utf8PathBuf::from(".")
    } else {
        Utf8PathBuf::from(dest.trim_end_matches('/'))
    };
    std::fs::create_dir_all(cleaned.as_std_path()).map_err(|err| PullError::DestinationPrep {
        dest: cleaned.to_string(),
        message: err.to_string(),
    })?;
    Ok(cleaned)
}
