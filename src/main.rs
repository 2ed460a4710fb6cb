//! Binary entry point for the `rr` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;

use rr::cleanup::{CleanupEngine, CleanupError};
use rr::config::{ConfigError, ProjectConfig};
use rr::exec::ProcessCommandRunner;
use rr::host::SelectError;
use rr::run::{HostChoice, RunError, RunOrchestrator, local_branches};
use rr::sync::SyncOutcome;

mod cli;

use cli::{CleanCommand, Cli, RunCommand, SyncCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    LoadConfig(ConfigError),
    #[error(transparent)]
    Config(ConfigError),
    #[error(transparent)]
    Run(RunError),
    #[error(transparent)]
    Select(SelectError),
    #[error(transparent)]
    Cleanup(CleanupError),
    #[error("failed to read current working directory: {0}")]
    WorkingDir(io::Error),
    #[error("current working directory is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("run needs a task name")]
    MissingTaskName,
    #[error("cleanup requires a remote host; none was reachable")]
    LocalCleanup,
}

fn main() {
    env_logger::init();
    let parsed = Cli::parse();
    let exit_code = match dispatch(parsed) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn dispatch(parsed: Cli) -> Result<i32, CliError> {
    match parsed {
        Cli::Run(command) => run_task(&command),
        Cli::Sync(command) => sync_tree(&command),
        Cli::Pull(command) => pull_artifacts(&command),
        Cli::Clean(command) => clean_remote(&command),
        Cli::Hosts => list_hosts(),
    }
}

fn load_project() -> Result<(ProjectConfig, Utf8PathBuf), CliError> {
    let config = ProjectConfig::load_without_cli_args().map_err(CliError::LoadConfig)?;
    config.validate().map_err(CliError::Config)?;

    let cwd = std::env::current_dir().map_err(CliError::WorkingDir)?;
    let root = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::NonUtf8Path(path.display().to_string()))?;
    Ok((config, root))
}

fn choice_of(host: Option<&str>, tag: Option<&str>) -> HostChoice {
    HostChoice {
        name: host.map(ToOwned::to_owned),
        tag: tag.map(ToOwned::to_owned),
    }
}

fn run_task(command: &RunCommand) -> Result<i32, CliError> {
    let (config, root) = load_project()?;
    let orchestrator = RunOrchestrator::new(config, root, ProcessCommandRunner);

    let (task_name, extra_args) = command
        .task
        .split_first()
        .ok_or(CliError::MissingTaskName)?;
    let choice = choice_of(command.host.as_deref(), command.tag.as_deref());

    let outcome = orchestrator
        .run_task(task_name, &choice, extra_args, Box::new(io::stdout()))
        .map_err(CliError::Run)?;

    if let Some(ref diagnostic) = outcome.missing_tool {
        let mut stderr = io::stderr();
        writeln!(stderr, "{diagnostic}").ok();
        writeln!(stderr, "{}", diagnostic.suggestion).ok();
    }

    Ok(outcome.result.exit_code)
}

fn progress_to_stdout() -> impl FnMut(&str) + Send {
    |line: &str| {
        writeln!(io::stdout(), "{line}").ok();
    }
}

fn sync_tree(command: &SyncCommand) -> Result<i32, CliError> {
    let (config, root) = load_project()?;
    let orchestrator = RunOrchestrator::new(config, root, ProcessCommandRunner);
    let choice = choice_of(command.host.as_deref(), command.tag.as_deref());

    let mut sink = progress_to_stdout();
    let outcome = orchestrator
        .sync_only(&choice, Some(&mut sink))
        .map_err(CliError::Run)?;

    let message = match outcome {
        SyncOutcome::SkippedLocal => "local connection; nothing to sync",
        SyncOutcome::AlreadyClean => "remote already up to date",
        SyncOutcome::Synced { fast_path: true } => "synced (changed files only)",
        SyncOutcome::Synced { fast_path: false } => "synced",
    };
    writeln!(io::stdout(), "{message}").ok();
    Ok(0)
}

fn pull_artifacts(command: &SyncCommand) -> Result<i32, CliError> {
    let (config, root) = load_project()?;
    let orchestrator = RunOrchestrator::new(config, root, ProcessCommandRunner);
    let choice = choice_of(command.host.as_deref(), command.tag.as_deref());

    let mut sink = progress_to_stdout();
    orchestrator
        .pull_only(&choice, Some(&mut sink))
        .map_err(CliError::Run)?;
    Ok(0)
}

fn clean_remote(command: &CleanCommand) -> Result<i32, CliError> {
    let (config, root) = load_project()?;
    let project_name = root
        .file_name()
        .map_or_else(|| String::from("project"), ToOwned::to_owned);
    let orchestrator = RunOrchestrator::new(config, root.clone(), ProcessCommandRunner);

    let connection = orchestrator
        .selector()
        .select(command.host.as_deref())
        .map_err(CliError::Select)?;
    let client = connection.client().ok_or(CliError::LocalCleanup)?;

    let template = connection.host().dir.replace("${PROJECT}", &project_name);
    let engine = CleanupEngine::new(client, template);

    let active = local_branches(root.as_path(), &ProcessCommandRunner).unwrap_or_default();
    let stale = engine.discover(&active).map_err(CliError::Cleanup)?;

    let mut stdout = io::stdout();
    if stale.is_empty() {
        writeln!(stdout, "no stale branch directories on {}", connection.name()).ok();
        return Ok(0);
    }

    for dir in &stale {
        writeln!(stdout, "{}\t{}\t{}", dir.disk_usage, dir.branch, dir.path).ok();
    }

    if !command.apply {
        writeln!(stdout, "re-run with --apply to delete").ok();
        return Ok(0);
    }

    let (removed, errors) = engine.remove(&stale);
    writeln!(stdout, "removed {} directories", removed.len()).ok();
    for err in &errors {
        report_error(err);
    }
    Ok(if errors.is_empty() { 0 } else { 1 })
}

fn list_hosts() -> Result<i32, CliError> {
    let (config, _root) = load_project()?;
    let mut stdout = io::stdout();
    for (name, host) in &config.hosts {
        let tags = if host.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", host.tags.join(", "))
        };
        writeln!(stdout, "{name}\t{}{tags}", host.ssh.join(", ")).ok();
    }
    Ok(0)
}

fn report_error(err: &impl std::fmt::Display) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &impl std::fmt::Display) {
    if writeln!(target, "{err}").is_err() {}
}
