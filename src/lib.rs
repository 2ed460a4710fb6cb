//! Core library for the `rr` remote task runner.
//!
//! The crate mirrors a local working tree to a per-branch directory on a
//! remote host, runs project tasks there over SSH with framework-aware
//! output formatting, pulls result artifacts back, and cleans up stale
//! per-branch directories. Every external program (`ssh`, `rsync`, `git`)
//! is driven through the [`exec::CommandRunner`] seam so behaviour can be
//! scripted in tests.

pub mod cleanup;
pub mod config;
pub mod exec;
pub mod git;
pub mod host;
pub mod output;
pub mod pull;
pub mod requirements;
pub mod run;
pub mod shell;
pub mod sync;
pub mod task;
pub mod test_support;
pub mod toolcheck;

pub use cleanup::{CleanupEngine, CleanupError, StaleDir};
pub use config::{ConfigError, ProjectConfig, SshSettings};
pub use exec::{
    CommandOutput, CommandRunner, ExecError, ProcessCommandRunner, SshClient, SshOptions,
};
pub use git::{ChangeSource, GitError, TreeSnapshot, WorkingTree};
pub use host::{
    Connection, ConnectionCache, ConnectionEvent, ConnectionObserver, Host, ProbeError,
    ProbeReason, SelectError, Selector,
};
pub use output::{Formatter, FormatterRegistry, OutputPipeline, TestCounts, TestReport};
pub use pull::{PullError, PullItem, Puller};
pub use requirements::{RequirementCache, RequirementStatus, check_requirements};
pub use run::{HostChoice, RunError, RunOrchestrator, RunOutcome};
pub use sync::{
    SyncError, SyncOutcome, SyncRequest, SyncSettings, SyncState, SyncStateStore, Syncer,
};
pub use task::{Executor, OnFail, Step, StepResult, Task, TaskError, TaskResult};
pub use toolcheck::{MissingToolError, PathProbeResult, diagnose};
