//! Rsync mirroring of the working tree to a per-branch remote directory.
//!
//! The engine prefers a git-aware fast path that ships only files reported
//! changed relative to a base branch, guarded by the persisted sync state:
//! when the `{branch, host, alias}` triple on disk does not match the
//! current sync, or the change set is too large, the full rsync path runs
//! instead. Preserve patterns are protected from `--delete` in both paths.

mod exit_code;
mod progress;
mod state;

pub use progress::{ProgressSink, RsyncProgress, parse_progress};
pub use state::{STATE_DIR, STATE_FILE, StateError, SyncState, SyncStateStore};

pub(crate) use exit_code::describe_exit;
pub(crate) use progress::{DiscardWriter, LineSplitter};

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::exec::{CommandRunner, ExecError};
use crate::git::TreeSnapshot;
use crate::host::Connection;
use crate::output::CappedBuffer;
use crate::shell::quote_preserve_tilde;

use exit_code::{classify_failure, install_hint};

/// Maximum change-set size the fast path will ship file-by-file.
pub const FAST_PATH_MAX_FILES: usize = 500;

/// Name of the SSH control-socket directory under the system temp dir.
pub const CONTROL_SOCKET_DIR: &str = "rr-ssh";

/// Bytes of rsync stderr retained for post-exit diagnostics.
const STDERR_CAP: usize = 4096;

/// Effective sync behaviour after merging configuration layers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncSettings {
    /// Patterns excluded from the mirror.
    pub exclude: Vec<String>,
    /// Patterns protected from rsync's `--delete`.
    pub preserve: Vec<String>,
    /// Extra flags appended to full-path invocations.
    pub extra_flags: Vec<String>,
    /// Enables the git-aware fast path.
    pub git_aware: bool,
    /// Base branch for changed-file comparisons.
    pub base_branch: String,
}

/// How a sync request was satisfied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    /// The connection is local; nothing to mirror.
    SkippedLocal,
    /// The fast path found no changed files; rsync never ran.
    AlreadyClean,
    /// Rsync ran to completion.
    Synced {
        /// Whether the git-aware include list was used.
        fast_path: bool,
    },
}

/// Errors surfaced while mirroring the working tree.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SyncError {
    /// Raised when the source directory does not exist.
    #[error("sync source directory missing: {path}")]
    MissingSource {
        /// Path that was expected to be synchronised.
        path: Utf8PathBuf,
    },
    /// Raised when the rsync binary cannot be found locally.
    #[error("rsync is not installed; install it with: {hint}")]
    RsyncNotInstalled {
        /// Platform-specific install suggestion.
        hint: String,
    },
    /// Raised when the local rsync predates `--info=progress2`.
    #[error("rsync is too old (3.1.0 or newer is required); upgrade with: {hint}")]
    RsyncTooOld {
        /// Platform-specific upgrade suggestion.
        hint: String,
    },
    /// Raised when the remote target directory cannot be created.
    #[error("failed to create remote directory {dir}: {stderr}")]
    RemoteMkdir {
        /// Directory the sync needed.
        dir: String,
        /// Stderr from the remote `mkdir`.
        stderr: String,
    },
    /// Raised when rsync exits non-zero.
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
    /// Raised when the sync state cannot be persisted.
    #[error(transparent)]
    State(#[from] StateError),
}

/// One sync request: where from, and which branch identity it carries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncRequest<'a> {
    /// Local directory whose contents are mirrored.
    pub source: &'a Utf8Path,
    /// Project name substituted for `${PROJECT}`.
    pub project: &'a str,
    /// Branch name substituted for `${BRANCH}`.
    pub branch: &'a str,
    /// Changed files relative to the base branch, when known. `None`
    /// disables the fast path regardless of settings.
    pub snapshot: Option<&'a TreeSnapshot>,
}

/// Mirrors a working tree onto a remote host via rsync.
#[derive(Clone, Debug)]
pub struct Syncer<R> {
    rsync_bin: String,
    ssh_config_file: Option<String>,
    runner: R,
}

impl<R: CommandRunner> Syncer<R> {
    /// Creates a syncer using the provided runner.
    pub fn new(runner: R) -> Self {
        Self {
            rsync_bin: String::from("rsync"),
            ssh_config_file: None,
            runner,
        }
    }

    /// Overrides the SSH configuration file forwarded to rsync's transport.
    #[must_use]
    pub fn with_ssh_config_file(mut self, config_file: Option<String>) -> Self {
        self.ssh_config_file = config_file;
        self
    }

    /// Mirrors `request.source` to the connection's expanded directory.
    ///
    /// Local connections are a no-op. On any successful sync with the fast
    /// path enabled, the sync state is updated to the current
    /// `{branch, host, alias}` triple.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when rsync is missing or too old, the remote
    /// directory cannot be created, or the transfer fails.
    pub fn sync(
        &self,
        connection: &Connection<R>,
        request: &SyncRequest<'_>,
        settings: &SyncSettings,
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<SyncOutcome, SyncError> {
        if connection.is_local() {
            return Ok(SyncOutcome::SkippedLocal);
        }
        if !request.source.is_dir() {
            return Err(SyncError::MissingSource {
                path: request.source.to_path_buf(),
            });
        }

        self.ensure_rsync()?;
        let control_dir = ensure_control_dir();
        let remote_dir = self.ensure_remote_dir(connection, request)?;

        let fast_files = fast_path_files(connection, request, settings);
        if let Some(files) = fast_files.as_ref()
            && files.is_empty()
        {
            record_state(connection, request, settings)?;
            return Ok(SyncOutcome::AlreadyClean);
        }

        let destination = format!(
            "{}:{}/",
            connection.alias(),
            remote_dir.trim_end_matches('/')
        );
        let args = fast_files.as_ref().map_or_else(
            || self.full_args(control_dir.as_deref(), request.source, settings, &destination),
            |files| {
                self.fast_args(
                    control_dir.as_deref(),
                    request.source,
                    settings,
                    files,
                    &destination,
                )
            },
        );

        self.run_rsync(&args, sink)?;
        record_state(connection, request, settings)?;
        Ok(SyncOutcome::Synced {
            fast_path: fast_files.is_some(),
        })
    }

    fn ensure_rsync(&self) -> Result<(), SyncError> {
        let args = [OsString::from("--version")];
        match self.runner.run(&self.rsync_bin, &args) {
            Ok(_) => Ok(()),
            Err(ExecError::Spawn { .. }) => Err(SyncError::RsyncNotInstalled {
                hint: install_hint(),
            }),
            Err(other) => Err(SyncError::Exec(other)),
        }
    }

    fn ensure_remote_dir(
        &self,
        connection: &Connection<R>,
        request: &SyncRequest<'_>,
    ) -> Result<String, SyncError> {
        let client = connection
            .client()
            .ok_or_else(|| SyncError::ConnectionClosed {
                host: connection.name().to_owned(),
            })?;

        let remote_dir = connection
            .host()
            .expand_dir(request.branch, request.project);
        let command = format!("mkdir -p {}", quote_preserve_tilde(&remote_dir));
        let output = client.exec(&command)?;
        if !output.is_success() {
            return Err(SyncError::RemoteMkdir {
                dir: remote_dir,
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(remote_dir)
    }

    fn run_rsync(
        &self,
        args: &[OsString],
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<(), SyncError> {
        let mut stderr_cap = CappedBuffer::new(STDERR_CAP);
        let code = match sink {
            Some(progress_sink) => {
                let mut splitter = LineSplitter::new(progress_sink);
                self.runner
                    .run_streaming(&self.rsync_bin, args, None, &mut splitter, &mut stderr_cap)?
            }
            None => {
                let mut discard = DiscardWriter;
                self.runner
                    .run_streaming(&self.rsync_bin, args, None, &mut discard, &mut stderr_cap)?
            }
        };

        match code {
            Some(0) => Ok(()),
            Some(nonzero) => Err(classify_failure(nonzero, &stderr_cap.contents())),
            None => Err(SyncError::MissingExitCode),
        }
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

    fn base_args(&self, control_dir: Option<&Utf8Path>) -> Vec<OsString> {
        vec![
            OsString::from("-az"),
            OsString::from("--delete"),
            OsString::from("--force"),
            OsString::from("--info=progress2"),
            OsString::from("-e"),
            OsString::from(self.transport(control_dir)),
        ]
    }

    fn full_args(
        &self,
        control_dir: Option<&Utf8Path>,
        source: &Utf8Path,
        settings: &SyncSettings,
        destination: &str,
    ) -> Vec<OsString> {
        let mut args = self.base_args(control_dir);
        args.extend(preserve_filters(&settings.preserve));
        for pattern in &settings.exclude {
            args.push(OsString::from(format!("--exclude={pattern}")));
        }
        args.extend(settings.extra_flags.iter().map(OsString::from));
        args.push(source_arg(source));
        args.push(OsString::from(destination));
        args
    }

    fn fast_args(
        &self,
        control_dir: Option<&Utf8Path>,
        source: &Utf8Path,
        settings: &SyncSettings,
        files: &[String],
        destination: &str,
    ) -> Vec<OsString> {
        let mut args = self.base_args(control_dir);
        args.extend(preserve_filters(&settings.preserve));
        // Directory skeletons must stay visible so nested includes reach
        // their parents; the terminal catch-all then excludes everything
        // not explicitly listed, which also covers the config excludes.
        args.push(OsString::from("--include=*/"));
        for file in files {
            args.push(OsString::from(format!("--include={file}")));
        }
        args.push(OsString::from("--exclude=*"));
        args.push(source_arg(source));
        args.push(OsString::from(destination));
        args
    }
}

/// Decides whether the fast path applies and returns its include list.
///
/// `None` means "use the full path". An empty list means the remote is
/// already known to match the working tree.
fn fast_path_files<R: CommandRunner>(
    connection: &Connection<R>,
    request: &SyncRequest<'_>,
    settings: &SyncSettings,
) -> Option<Vec<String>> {
    if !settings.git_aware {
        return None;
    }
    let snapshot = request.snapshot?;

    let store = SyncStateStore::new(request.source.to_path_buf());
    let recorded = store.load()?;
    let current = SyncState {
        branch: snapshot.branch.clone(),
        host: connection.name().to_owned(),
        alias: connection.alias().to_owned(),
    };
    if recorded != current {
        log::debug!("sync state mismatch; falling back to full sync");
        return None;
    }

    if snapshot.changed_files.len() > FAST_PATH_MAX_FILES {
        log::debug!(
            "{} changed files exceed the fast-path cap of {FAST_PATH_MAX_FILES}",
            snapshot.changed_files.len()
        );
        return None;
    }

    Some(snapshot.changed_files.clone())
}

fn record_state<R: CommandRunner>(
    connection: &Connection<R>,
    request: &SyncRequest<'_>,
    settings: &SyncSettings,
) -> Result<(), SyncError> {
    if !settings.git_aware {
        return Ok(());
    }
    let store = SyncStateStore::new(request.source.to_path_buf());
    store.save(&SyncState {
        branch: request.branch.to_owned(),
        host: connection.name().to_owned(),
        alias: connection.alias().to_owned(),
    })?;
    Ok(())
}

/// Emits `--filter=P <p>` for every preserve pattern, adding the `**/`
/// variant unless the pattern already carries it. Preserves precede
/// excludes so they protect paths the transfer would otherwise delete.
fn preserve_filters(preserve: &[String]) -> Vec<OsString> {
    let mut filters = Vec::new();
    for pattern in preserve {
        filters.push(OsString::from(format!("--filter=P {pattern}")));
        if !pattern.starts_with("**/") {
            filters.push(OsString::from(format!("--filter=P **/{pattern}")));
        }
    }
    filters
}

fn source_arg(source: &Utf8Path) -> OsString {
    OsString::from(format!("{}/", source.as_str().trim_end_matches('/')))
}

/// Creates the SSH control-socket directory under the system temp dir.
///
/// Shared by the sync and pull engines so both directions multiplex over
/// the same master. Failures are non-fatal: rsync still works without
/// connection sharing.
pub(crate) fn ensure_control_dir() -> Option<Utf8PathBuf> {
    let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir()).ok()?;
    let dir = temp.join(CONTROL_SOCKET_DIR);
    if let Err(err) = std::fs::create_dir_all(dir.as_std_path()) {
        log::warn!("could not create control socket dir {dir}: {err}");
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o700);
        if let Err(err) = std::fs::set_permissions(dir.as_std_path(), permissions) {
            log::warn!("could not restrict control socket dir {dir}: {err}");
        }
    }
    Some(dir)
}
