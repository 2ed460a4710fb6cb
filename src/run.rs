//! Orchestrates the end-to-end remote run workflow.
//!
//! A run selects a host, mirrors the working tree, executes the task with
//! framework-aware output, diagnoses missing tools on failure, and pulls
//! artifacts back on success. The orchestrator borrows everything through
//! the library seams, so the whole flow is scriptable in tests.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::config::{ConfigError, ProjectConfig};
use crate::exec::{CommandRunner, ExecError};
use crate::git::{ChangeSource, GitError, TreeSnapshot, WorkingTree};
use crate::host::{Connection, SelectError, Selector};
use crate::output::{FormatterRegistry, OutputPipeline};
use crate::pull::{PullError, PullItem, Puller};
use crate::requirements::{check_requirements, global_requirement_cache};
use crate::sync::{ProgressSink, SyncError, SyncRequest, Syncer};
use crate::task::{Executor, Task, TaskError, TaskResult};
use crate::toolcheck::{MissingToolError, diagnose};

/// Errors surfaced while performing a remote run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Raised when configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when no connection can be established.
    #[error(transparent)]
    Select(#[from] SelectError),
    /// Raised when the working tree cannot be interrogated.
    #[error(transparent)]
    Git(#[from] GitError),
    /// Raised when mirroring fails.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Raised when task execution fails to run at all.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// Raised when artifact pulls fail.
    #[error(transparent)]
    Pull(#[from] PullError),
    /// Raised when a requirement probe cannot be sent.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Result of a full run: the task outcome plus an optional diagnosis.
#[derive(Debug)]
pub struct RunOutcome {
    /// Task result with exit code and per-step outcomes.
    pub result: TaskResult,
    /// Missing-tool diagnosis, when the failure looked like one.
    pub missing_tool: Option<MissingToolError>,
}

/// Which host to run against.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostChoice {
    /// Host name, when given.
    pub name: Option<String>,
    /// Tag filter, when given; takes precedence over `name`.
    pub tag: Option<String>,
}

/// Drives select → sync → execute → pull for one project.
pub struct RunOrchestrator<R: CommandRunner + Clone + Sync> {
    config: ProjectConfig,
    selector: Selector<R>,
    syncer: Syncer<R>,
    puller: Puller<R>,
    runner: R,
    project_root: Utf8PathBuf,
    project_name: String,
}

impl<R: CommandRunner + Clone + Sync + Send> RunOrchestrator<R> {
    /// Creates an orchestrator for the project rooted at `project_root`.
    #[must_use]
    pub fn new(config: ProjectConfig, project_root: Utf8PathBuf, runner: R) -> Self {
        let ssh_settings = config.ssh_settings();
        let selector = Selector::from_config(&config, runner.clone());
        let syncer =
            Syncer::new(runner.clone()).with_ssh_config_file(ssh_settings.config_file.clone());
        let puller = Puller::new(runner.clone()).with_ssh_config_file(ssh_settings.config_file);
        let project_name = project_root
            .file_name()
            .map_or_else(|| String::from("project"), ToOwned::to_owned);
        Self {
            config,
            selector,
            syncer,
            puller,
            runner,
            project_root,
            project_name,
        }
    }

    /// Returns the selector, for observer wiring and explicit closing.
    #[must_use]
    pub const fn selector(&self) -> &Selector<R> {
        &self.selector
    }

    /// Runs a named task end to end and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when selection, sync, execution, or pulling
    /// fails; a task that merely exits non-zero is a normal outcome.
    pub fn run_task(
        &self,
        task_name: &str,
        choice: &HostChoice,
        extra_args: &[String],
        target: Box<dyn Write + Send>,
    ) -> Result<RunOutcome, RunError> {
        let task = self.config.task(task_name)?;
        let connection = self.select(choice)?;

        self.warn_unsatisfied_requirements(&connection)?;

        let (branch, snapshot) = self.tree_state(&connection)?;
        self.sync_tree(&connection, &branch, snapshot.as_ref(), None)?;

        let detect_command = first_command(&task);
        let registry = FormatterRegistry::new(true);
        let pipeline = OutputPipeline::new(registry.detect(&detect_command, ""), target);

        let executor = Executor::new(&connection, self.runner.clone(), &self.project_name, &branch)
            .with_local_dir(self.project_root.clone());
        let result = executor.execute(&task, extra_args, &pipeline)?;
        pipeline.finish(result.exit_code);

        let missing_tool = if result.exit_code == 0 {
            self.pull_artifacts(&connection, &branch, None)?;
            None
        } else {
            let command = failed_command(&task, &result);
            diagnose(
                connection.client(),
                connection.name(),
                &command,
                &pipeline.captured_stderr(),
                result.exit_code,
            )
        };

        Ok(RunOutcome {
            result,
            missing_tool,
        })
    }

    /// Mirrors the working tree without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when selection or mirroring fails.
    pub fn sync_only(
        &self,
        choice: &HostChoice,
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<crate::sync::SyncOutcome, RunError> {
        let connection = self.select(choice)?;
        let (branch, snapshot) = self.tree_state(&connection)?;
        Ok(self.sync_tree(&connection, &branch, snapshot.as_ref(), sink)?)
    }

    /// Pulls the configured artifact set without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when selection or pulling fails.
    pub fn pull_only(
        &self,
        choice: &HostChoice,
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<(), RunError> {
        let connection = self.select(choice)?;
        let (branch, _snapshot) = self.tree_state(&connection)?;
        self.pull_artifacts(&connection, &branch, sink)
    }

    fn select(&self, choice: &HostChoice) -> Result<Connection<R>, RunError> {
        let connection = match choice.tag.as_deref() {
            Some(tag) => self.selector.select_by_tag(tag)?,
            None => self.selector.select(choice.name.as_deref())?,
        };
        Ok(connection)
    }

    fn warn_unsatisfied_requirements(&self, connection: &Connection<R>) -> Result<(), RunError> {
        if self.config.requirements.is_empty() {
            return Ok(());
        }
        let statuses = check_requirements(
            connection,
            &self.config.requirements,
            global_requirement_cache(),
        )?;
        for (tool, status) in statuses {
            if !status.satisfied {
                log::warn!(
                    "requirement '{tool}' is not available on {}{}",
                    connection.name(),
                    if status.can_install {
                        " (an installer is known)"
                    } else {
                        ""
                    }
                );
            }
        }
        Ok(())
    }

    /// Returns the current branch and, when the fast path is enabled, the
    /// changed-file snapshot. Outside a git repository the base branch
    /// stands in so directory templates still expand.
    fn tree_state(
        &self,
        connection: &Connection<R>,
    ) -> Result<(String, Option<TreeSnapshot>), RunError> {
        let settings = self.config.sync_settings();
        let tree = WorkingTree::new(self.project_root.clone(), self.runner.clone());

        if connection.is_local() {
            return Ok((settings.base_branch, None));
        }

        match tree.current_branch() {
            Ok(branch) => {
                let snapshot = if settings.git_aware {
                    match tree.snapshot(&settings.base_branch) {
                        Ok(snapshot) => Some(snapshot),
                        Err(err) => {
                            log::debug!("changed-file snapshot unavailable: {err}");
                            None
                        }
                    }
                } else {
                    None
                };
                Ok((branch, snapshot))
            }
            Err(err) => {
                log::debug!("not a git repository, using base branch: {err}");
                Ok((settings.base_branch, None))
            }
        }
    }

    fn sync_tree(
        &self,
        connection: &Connection<R>,
        branch: &str,
        snapshot: Option<&TreeSnapshot>,
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<crate::sync::SyncOutcome, SyncError> {
        let settings = self.config.sync_settings();
        let request = SyncRequest {
            source: self.project_root.as_path(),
            project: &self.project_name,
            branch,
            snapshot,
        };
        self.syncer.sync(connection, &request, &settings, sink)
    }

    fn pull_artifacts(
        &self,
        connection: &Connection<R>,
        branch: &str,
        sink: Option<&mut dyn ProgressSink>,
    ) -> Result<(), RunError> {
        if self.config.pull.is_empty() {
            return Ok(());
        }
        let items: Vec<PullItem> = self
            .config
            .pull
            .iter()
            .map(|item| PullItem {
                src: item.src.clone(),
                dest: item.dest.clone(),
            })
            .collect();
        let remote_dir = connection.host().expand_dir(branch, &self.project_name);
        self.puller.pull(connection, &remote_dir, &items, sink)?;
        Ok(())
    }
}

/// Returns the command used for formatter detection.
fn first_command(task: &Task) -> String {
    match task {
        Task::Single(run) => run.clone(),
        Task::Steps(steps) => steps
            .first()
            .map(|step| step.run.clone())
            .unwrap_or_default(),
    }
}

/// Returns the command of the step the task failed on.
fn failed_command(task: &Task, result: &TaskResult) -> String {
    match task {
        Task::Single(run) => run.clone(),
        Task::Steps(steps) => usize::try_from(result.failed_step)
            .ok()
            .and_then(|index| steps.get(index))
            .map(|step| step.run.clone())
            .unwrap_or_default(),
    }
}

/// Lists local branch names for cleanup cross-checks.
///
/// # Errors
///
/// Returns [`GitError`] when `git for-each-ref` fails.
pub fn local_branches<R: CommandRunner + Clone>(
    root: &Utf8Path,
    runner: &R,
) -> Result<Vec<String>, GitError> {
    let tree = WorkingTree::new(root.to_path_buf(), runner.clone());
    tree.branch_names()
}
