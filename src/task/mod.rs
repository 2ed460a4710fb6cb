//! Task execution: single commands and ordered multi-step runs.
//!
//! Steps run strictly in order. A failing step either stops the task or,
//! with `on_fail: continue`, records the failure and proceeds. The first
//! failing index is remembered for reporting while the task's exit code
//! mirrors the most recent non-zero step.

pub mod command;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::exec::{CommandRunner, ExecError};
use crate::host::Connection;
use crate::output::OutputPipeline;

/// Per-step failure policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OnFail {
    /// Abort the task at the first non-zero exit (default).
    #[default]
    Stop,
    /// Record the failure and run the next step.
    Continue,
}

/// One step of a multi-step task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    /// Optional display name.
    pub name: Option<String>,
    /// Command to run.
    pub run: String,
    /// Failure policy.
    pub on_fail: OnFail,
}

impl Step {
    /// Returns the display name, defaulting to `step N` (1-indexed).
    #[must_use]
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("step {}", index.saturating_add(1)))
    }
}

/// A task: one command, or an ordered list of steps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Task {
    /// Single command form.
    Single(String),
    /// Multi-step form.
    Steps(Vec<Step>),
}

/// Outcome of one executed step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepResult {
    /// Display name of the step.
    pub name: String,
    /// Exit code of the step.
    pub exit_code: i32,
    /// Failure policy the step declared.
    pub on_fail: OnFail,
}

/// Outcome of a whole task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskResult {
    /// Exit code of the task: the most recent non-zero step exit, or 0.
    pub exit_code: i32,
    /// Index of the first failed step, or -1 when none failed. Single
    /// command tasks always report -1.
    pub failed_step: i32,
    /// Per-step outcomes in execution order; empty for single commands.
    pub step_results: Vec<StepResult>,
}

/// Observer for step lifecycle events. Callbacks must not block.
pub trait StepObserver {
    /// Called before a step starts, before any of its output.
    fn on_step_start(&self, index: usize, total: usize, step: &Step);
    /// Called after a step finishes, after all of its output.
    fn on_step_complete(
        &self,
        index: usize,
        total: usize,
        step: &Step,
        duration: Duration,
        exit_code: i32,
    );
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStepObserver;

impl StepObserver for NullStepObserver {
    fn on_step_start(&self, _index: usize, _total: usize, _step: &Step) {}

    fn on_step_complete(
        &self,
        _index: usize,
        _total: usize,
        _step: &Step,
        _duration: Duration,
        _exit_code: i32,
    ) {
    }
}

/// Errors surfaced while executing a task.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TaskError {
    /// Raised when extra positional arguments are given to a step task.
    #[error("extra arguments are not supported for multi-step tasks")]
    ExtraArgsUnsupported,
    /// Raised when a command terminates without an exit status.
    #[error("'{command}' terminated without an exit status")]
    MissingExitCode {
        /// Command that terminated abnormally.
        command: String,
    },
    /// Raised when a command cannot be spawned or streamed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Drives a task against a borrowed connection.
pub struct Executor<'a, R: CommandRunner> {
    connection: &'a Connection<R>,
    runner: R,
    project: String,
    branch: String,
    env: BTreeMap<String, String>,
    local_dir: Option<Utf8PathBuf>,
    observer: &'a dyn StepObserver,
}

impl<'a, R: CommandRunner> Executor<'a, R> {
    /// Creates an executor. The runner is used for local execution; remote
    /// commands go through the connection's SSH client.
    pub fn new(
        connection: &'a Connection<R>,
        runner: R,
        project: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            runner,
            project: project.into(),
            branch: branch.into(),
            env: BTreeMap::new(),
            local_dir: None,
            observer: &NullStepObserver,
        }
    }

    /// Sets environment variables exported before the command.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the working directory for local execution.
    #[must_use]
    pub fn with_local_dir(mut self, dir: Utf8PathBuf) -> Self {
        self.local_dir = Some(dir);
        self
    }

    /// Replaces the step observer.
    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn StepObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Executes `task`, streaming output through `pipeline`.
    ///
    /// Extra positional arguments are appended (space-joined) to single
    /// commands and rejected for multi-step tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when a command cannot be run at all; a step
    /// exiting non-zero is not an error but part of the [`TaskResult`].
    pub fn execute(
        &self,
        task: &Task,
        extra_args: &[String],
        pipeline: &OutputPipeline,
    ) -> Result<TaskResult, TaskError> {
        match task {
            Task::Single(run) => {
                let full_command = if extra_args.is_empty() {
                    run.clone()
                } else {
                    format!("{run} {}", extra_args.join(" "))
                };
                let exit_code = self.run_command(&full_command, pipeline)?;
                Ok(TaskResult {
                    exit_code,
                    failed_step: -1,
                    step_results: Vec::new(),
                })
            }
            Task::Steps(steps) => {
                if !extra_args.is_empty() {
                    return Err(TaskError::ExtraArgsUnsupported);
                }
                self.execute_steps(steps, pipeline)
            }
        }
    }

    fn execute_steps(
        &self,
        steps: &[Step],
        pipeline: &OutputPipeline,
    ) -> Result<TaskResult, TaskError> {
        let total = steps.len();
        let mut step_results = Vec::new();
        let mut failed_step = -1_i32;
        let mut exit_code = 0_i32;

        for (index, step) in steps.iter().enumerate() {
            self.observer.on_step_start(index, total, step);
            let started = Instant::now();
            let step_exit = self.run_command(&step.run, pipeline)?;
            self.observer
                .on_step_complete(index, total, step, started.elapsed(), step_exit);

            step_results.push(StepResult {
                name: step.display_name(index),
                exit_code: step_exit,
                on_fail: step.on_fail,
            });

            if step_exit != 0 {
                if failed_step < 0 {
                    failed_step = i32::try_from(index).unwrap_or(i32::MAX);
                }
                exit_code = step_exit;
                if step.on_fail == OnFail::Stop {
                    break;
                }
            }
        }

        Ok(TaskResult {
            exit_code,
            failed_step,
            step_results,
        })
    }

    fn run_command(&self, run: &str, pipeline: &OutputPipeline) -> Result<i32, TaskError> {
        let mut stdout = pipeline.stdout_writer();
        let mut stderr = pipeline.stderr_writer();

        let code = match self.connection.client() {
            Some(client) => {
                let remote_dir = self
                    .connection
                    .host()
                    .expand_dir(&self.branch, &self.project);
                let assembled =
                    command::assemble_remote(self.connection.host(), &remote_dir, run, &self.env);
                client.exec_stream(&assembled, &mut stdout, &mut stderr)?
            }
            None => {
                let body = command::assemble_local(run, &self.env);
                let shell = command::local_shell();
                let args = [OsString::from("-c"), OsString::from(body)];
                self.runner.run_streaming(
                    &shell,
                    &args,
                    self.local_dir.as_deref(),
                    &mut stdout,
                    &mut stderr,
                )?
            }
        };

        code.ok_or_else(|| TaskError::MissingExitCode {
            command: run.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests;
