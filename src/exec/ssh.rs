//! Thin wrapper around the system `ssh` client.
//!
//! Aliases are opaque to this crate: host, user, port, and identity all come
//! from the user's SSH configuration. The wrapper only adds the options the
//! orchestration layer relies on (batch mode so unattended runs never block
//! on a prompt, an optional connect timeout, an optional `-F` config file).

use std::ffi::OsString;
use std::io::Write;
use std::time::Duration;

use camino::Utf8PathBuf;

use super::{CommandOutput, CommandRunner, ExecError};

/// Options applied to every `ssh` invocation for one client.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SshOptions {
    /// Connect timeout passed as `-o ConnectTimeout=<secs>` when set.
    pub connect_timeout: Option<Duration>,
    /// Alternative SSH configuration file passed via `-F` when set.
    pub config_file: Option<Utf8PathBuf>,
}

/// Executes commands on a single SSH alias through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct SshClient<R> {
    alias: String,
    ssh_bin: String,
    options: SshOptions,
    runner: R,
}

impl<R: CommandRunner> SshClient<R> {
    /// Creates a client for `alias` using the provided runner and options.
    pub fn new(alias: impl Into<String>, options: SshOptions, runner: R) -> Self {
        Self {
            alias: alias.into(),
            ssh_bin: String::from("ssh"),
            options,
            runner,
        }
    }

    /// Returns the alias this client connects to.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Returns the options applied to every invocation.
    #[must_use]
    pub const fn options(&self) -> &SshOptions {
        &self.options
    }

    /// Executes `command` on the remote host, capturing output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when the `ssh` binary cannot be started.
    pub fn exec(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let args = self.ssh_args(command);
        self.runner.run(&self.ssh_bin, &args)
    }

    /// Executes `command` while forwarding remote output into the sinks.
    ///
    /// # Errors
    ///
    /// Propagates spawn and stream failures from the underlying runner.
    pub fn exec_stream(
        &self,
        command: &str,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<Option<i32>, ExecError> {
        let args = self.ssh_args(command);
        self.runner
            .run_streaming(&self.ssh_bin, &args, None, stdout, stderr)
    }

    /// Checks whether the remote side still answers a trivial session.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.exec("true").map_or(false, |output| output.is_success())
    }

    /// Best-effort teardown of any multiplexed control master for the alias.
    ///
    /// Failures are ignored: a missing master is the common case.
    pub fn close_master(&self) {
        let args = vec![
            OsString::from("-O"),
            OsString::from("exit"),
            OsString::from(&self.alias),
        ];
        if let Err(err) = self.runner.run(&self.ssh_bin, &args) {
            log::debug!("control master teardown for {} failed: {err}", self.alias);
        }
    }

    fn ssh_args(&self, command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-o"), OsString::from("BatchMode=yes")];
        if let Some(timeout) = self.options.connect_timeout {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "ConnectTimeout={}",
                timeout.as_secs()
            )));
        }
        if let Some(ref config_file) = self.options.config_file {
            args.push(OsString::from("-F"));
            args.push(OsString::from(config_file.as_str()));
        }
        args.push(OsString::from(&self.alias));
        args.push(OsString::from(command));
        args
    }
}
