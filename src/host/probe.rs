//! SSH reachability probing with categorised failure reasons.
//!
//! A probe opens a real session (`ssh <alias> true`) under a connect
//! timeout and measures wall latency. Failures are categorised purely for
//! user-facing messages; selection treats every failure the same way and
//! moves to the next alias.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::SshSettings;
use crate::exec::{CommandRunner, SshClient, SshOptions};

/// Categorised reason a probe failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeReason {
    /// The connection attempt exceeded its deadline.
    Timeout,
    /// The remote actively refused the connection.
    Refused,
    /// No route to the host, or the network is down.
    Unreachable,
    /// Authentication was rejected.
    Auth,
    /// Host key verification failed.
    HostKey,
    /// Anything that does not match a known shape.
    Unknown,
}

impl fmt::Display for ProbeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Timeout => "timeout",
            Self::Refused => "connection refused",
            Self::Unreachable => "host unreachable",
            Self::Auth => "authentication failed",
            Self::HostKey => "host key verification failed",
            Self::Unknown => "unknown error",
        };
        f.write_str(text)
    }
}

/// Probe failure for one alias.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{alias}: {reason}: {cause}")]
pub struct ProbeError {
    /// Alias that failed.
    pub alias: String,
    /// Categorised reason.
    pub reason: ProbeReason,
    /// Underlying error text.
    pub cause: String,
}

/// Classifies an error string by lower-cased substring match, checked in
/// order. The first matching category wins.
#[must_use]
pub fn classify_failure(text: &str) -> ProbeReason {
    let lowered = text.to_lowercase();
    let rules: [(&[&str], ProbeReason); 5] = [
        (&["timeout", "i/o timeout", "timed out"], ProbeReason::Timeout),
        (&["connection refused"], ProbeReason::Refused),
        (
            &["no route to host", "network is unreachable", "host is down"],
            ProbeReason::Unreachable,
        ),
        (
            &[
                "unable to authenticate",
                "no supported methods",
                "permission denied",
                "authentication failed",
            ],
            ProbeReason::Auth,
        ),
        (&["host key"], ProbeReason::HostKey),
    ];

    for (needles, reason) in rules {
        if needles.iter().any(|needle| lowered.contains(needle)) {
            return reason;
        }
    }
    ProbeReason::Unknown
}

/// Builds the SSH options applied to probes and subsequent sessions.
#[must_use]
pub(crate) fn ssh_options(settings: &SshSettings) -> SshOptions {
    SshOptions {
        connect_timeout: Some(Duration::from_secs(settings.connect_timeout_secs)),
        config_file: settings
            .config_file
            .as_deref()
            .map(crate::shell::expand_tilde)
            .map(Into::into),
    }
}

/// Probes `alias` and returns a ready client plus the measured latency.
///
/// # Errors
///
/// Returns [`ProbeError`] with a categorised reason when the handshake or
/// trivial session fails.
pub(crate) fn probe_alias<R: CommandRunner + Clone>(
    runner: &R,
    settings: &SshSettings,
    alias: &str,
) -> Result<(SshClient<R>, Duration), ProbeError> {
    let client = SshClient::new(alias, ssh_options(settings), runner.clone());

    let started = Instant::now();
    match client.exec("true") {
        Ok(output) if output.is_success() => Ok((client, started.elapsed())),
        Ok(output) => {
            let cause = if output.stderr.trim().is_empty() {
                output.code.map_or_else(
                    || String::from("session terminated without an exit status"),
                    |code| format!("exit status {code}"),
                )
            } else {
                output.stderr.trim().to_owned()
            };
            Err(ProbeError {
                alias: alias.to_owned(),
                reason: classify_failure(&cause),
                cause,
            })
        }
        Err(err) => {
            let cause = err.to_string();
            Err(ProbeError {
                alias: alias.to_owned(),
                reason: classify_failure(&cause),
                cause,
            })
        }
    }
}
