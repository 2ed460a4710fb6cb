//! Rsync exit-code diagnosis.
//!
//! Rsync's exit codes are stable and documented; mapping them to short
//! descriptions turns "exit status 23" into something actionable. A special
//! case recognises rsync builds too old for `--info=progress2` from their
//! stderr, regardless of the exit code they chose.

use super::SyncError;

/// Returns a short description for an rsync exit code.
#[must_use]
pub(crate) const fn describe_exit(code: i32) -> &'static str {
    match code {
        1 => "Syntax or usage error",
        2 => "Protocol incompatibility",
        3 => "Errors selecting input/output files and directories",
        5 => "Error starting client-server protocol",
        10 => "Error in socket I/O",
        11 => "Error in file I/O",
        12 => "Error in rsync protocol data stream",
        23 => "Partial transfer due to error",
        24 => "Partial transfer due to vanished source files",
        255 => "SSH connection failed",
        _ => "rsync failed",
    }
}

/// Classifies a failed rsync run into a [`SyncError`].
///
/// The too-old check runs first: an rsync that rejects `--info=progress2`
/// reports a usage error, and surfacing that as "syntax error" would point
/// the user at the wrong fix.
#[must_use]
pub(crate) fn classify_failure(code: i32, stderr: &str) -> SyncError {
    if stderr.contains("unrecognized option") && stderr.contains("--info=progress2") {
        return SyncError::RsyncTooOld {
            hint: install_hint(),
        };
    }
    SyncError::RsyncFailed {
        code,
        reason: describe_exit(code),
        stderr: stderr.trim().to_owned(),
    }
}

/// Returns a platform-appropriate rsync install suggestion.
#[must_use]
pub(crate) fn install_hint() -> String {
    if cfg!(target_os = "macos") {
        String::from("brew install rsync")
    } else {
        String::from("apt-get install rsync (or your distribution's equivalent)")
    }
}
