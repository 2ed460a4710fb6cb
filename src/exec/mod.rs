//! Subprocess execution seam shared by every engine in the crate.
//!
//! All external programs (`ssh`, `rsync`, `git`) are driven through the
//! [`CommandRunner`] trait so behaviour can be scripted in tests without
//! spawning processes. The real implementation shells out to the host
//! operating system; streaming variants forward output while the child is
//! still running.

mod ssh;

pub use ssh::{SshClient, SshOptions};

use std::ffi::OsString;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8Path;
use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors surfaced while spawning or supervising external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when reading from or writing to a child stream fails.
    #[error("i/o error while running {program}: {message}")]
    Io {
        /// Command whose stream failed.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError>;

    /// Runs `program` while forwarding output into the provided sinks.
    ///
    /// `cwd` sets the child working directory when given; remote commands
    /// pass `None` because their working directory is part of the composed
    /// command string. The default implementation captures the full output
    /// and replays it into the sinks, which keeps scripted test doubles
    /// trivially compatible with streaming call sites.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when the command cannot be started and
    /// [`ExecError::Io`] when a sink rejects the forwarded bytes.
    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        cwd: Option<&Utf8Path>,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<Option<i32>, ExecError> {
        let _ = cwd;
        let output = self.run(program, args)?;
        let io_error = |err: std::io::Error| ExecError::Io {
            program: program.to_owned(),
            message: err.to_string(),
        };
        stdout.write_all(output.stdout.as_bytes()).map_err(io_error)?;
        stderr.write_all(output.stderr.as_bytes()).map_err(io_error)?;
        stdout.flush().map_err(io_error)?;
        stderr.flush().map_err(io_error)?;
        Ok(output.code)
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
        cwd: Option<&Utf8Path>,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<Option<i32>, ExecError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir.as_std_path());
        }

        let mut child = command.spawn().map_err(|err| ExecError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let forward_result = thread::scope(|scope| {
            let stderr_handle = child_stderr
                .map(|reader| scope.spawn(move || forward_stream(program, reader, stderr)));

            let stdout_result = child_stdout
                .map_or(Ok(()), |reader| forward_stream(program, reader, stdout));

            let stderr_result = stderr_handle.map_or(Ok(()), |handle| {
                handle.join().map_err(|_| ExecError::Io {
                    program: program.to_owned(),
                    message: String::from("stderr forwarder panicked"),
                })?
            });

            stdout_result.and(stderr_result)
        });

        let status = child.wait().map_err(|err| ExecError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;
        forward_result?;

        Ok(status.code())
    }
}

fn forward_stream(
    program: &str,
    mut reader: impl Read,
    sink: &mut (dyn Write + Send),
) -> Result<(), ExecError> {
    let mut buffer = [0_u8; 8192];
    let convert = |err: std::io::Error| ExecError::Io {
        program: program.to_owned(),
        message: err.to_string(),
    };

    loop {
        let read = reader.read(&mut buffer).map_err(convert)?;
        if read == 0 {
            break;
        }
        let chunk = buffer.get(..read).unwrap_or(&[]);
        sink.write_all(chunk).map_err(convert)?;
    }
    sink.flush().map_err(convert)
}

#[cfg(test)]
mod tests;
