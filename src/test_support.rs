//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::{Arc, Mutex};

use crate::exec::{CommandOutput, CommandRunner, ExecError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Every invocation is recorded as `(program, args)` so tests can assert on
/// the exact argv an engine built. The queue and the call log are shared
/// between clones, which lets a test keep a handle while the engine under
/// test owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    calls: Arc<Mutex<Vec<(String, Vec<OsString>)>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code with empty output.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with canned stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes a fully specified response.
    pub fn push_output(&self, code: Option<i32>, stdout: &str, stderr: &str) {
        let mut responses = self.responses.lock().unwrap_or_else(|err| err.into_inner());
        responses.push_back(CommandOutput {
            code,
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        });
    }

    /// Returns every `(program, args)` invocation seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Vec<OsString>)> {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Returns the args of invocation `index` rendered as plain strings.
    #[must_use]
    pub fn call_args(&self, index: usize) -> Vec<String> {
        self.calls()
            .get(index)
            .map(|(_, args)| {
                args.iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns how many invocations were recorded.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        self.calls
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push((program.to_owned(), args.to_vec()));

        self.responses
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}
