//! Project configuration structures and validation.
//!
//! Configuration is loaded via `ortho-config`, which merges defaults, a
//! discovered `rr.yaml` (or `.rr.yaml`), and `RR_*` environment variables.
//! The document declares the host pool, sync behaviour, named tasks, pull
//! items, and project requirements; typed views are handed to the engines so
//! nothing downstream re-parses raw configuration.

use std::collections::BTreeMap;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{OnFail, Step, Task};

/// Default SSH connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default base branch for git-aware sync comparisons.
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// Declarative description of one remote host.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct HostConfig {
    /// SSH aliases tried in declared order.
    pub ssh: Vec<String>,
    /// Remote directory template; may embed `${BRANCH}` and `${PROJECT}`.
    pub dir: String,
    /// Shell invocation prefix used to wrap remote commands, including the
    /// `-c` flag (for example `bash -c`). Defaults to `${SHELL:-/bin/bash} -c`
    /// evaluated on the remote side.
    #[serde(default)]
    pub shell: Option<String>,
    /// Commands chained before the task command (PATH exports and similar).
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Free-form labels used by tag-based selection.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Sync behaviour section of the project document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct SyncSection {
    /// Patterns excluded from the mirror.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Patterns protected from deletion on the remote.
    #[serde(default)]
    pub preserve: Vec<String>,
    /// Extra flags appended to full-sync rsync invocations.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Enables the git-aware fast path.
    #[serde(default)]
    pub git_aware: Option<bool>,
    /// Base branch used for changed-file comparisons.
    #[serde(default)]
    pub base_branch: Option<String>,
}

/// A named task: either a single command or an ordered step list.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct TaskConfig {
    /// Single command form.
    #[serde(default)]
    pub run: Option<String>,
    /// Multi-step form; mutually exclusive with `run`.
    #[serde(default)]
    pub steps: Option<Vec<StepConfig>>,
}

/// One step of a multi-step task.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct StepConfig {
    /// Optional display name; defaults to `step N`.
    #[serde(default)]
    pub name: Option<String>,
    /// Command to run.
    pub run: String,
    /// Failure policy: `stop` (default) or `continue`.
    #[serde(default)]
    pub on_fail: Option<String>,
}

/// One artifact pull declaration.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct PullItemConfig {
    /// Remote pattern relative to the host directory.
    pub src: String,
    /// Local destination directory; defaults to the current directory.
    #[serde(default)]
    pub dest: Option<String>,
}

/// Connection settings section of the project document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct SshSection {
    /// Per-alias connect timeout in seconds.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Alternative SSH configuration file passed to `ssh` and `rsync`.
    #[serde(default)]
    pub config_file: Option<String>,
    /// Returns a local pseudo-connection when every alias fails.
    #[serde(default)]
    pub local_fallback: Option<bool>,
}

/// Project-level configuration loaded from layered sources.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "RR",
    discovery(
        app_name = "rr",
        env_var = "RR_CONFIG_PATH",
        config_file_name = "rr.yaml",
        dotfile_name = ".rr.yaml",
        project_file_name = "rr.yaml"
    )
)]
pub struct ProjectConfig {
    /// Host pool keyed by host name; iteration order is alphabetical.
    #[ortho_config(default = BTreeMap::new(), skip_cli)]
    pub hosts: BTreeMap<String, HostConfig>,
    /// Sync behaviour overrides.
    #[ortho_config(skip_cli)]
    pub sync: Option<SyncSection>,
    /// Named tasks.
    #[ortho_config(default = BTreeMap::new(), skip_cli)]
    pub tasks: BTreeMap<String, TaskConfig>,
    /// Artifact pulls performed after a task.
    #[ortho_config(default = Vec::new(), skip_cli)]
    pub pull: Vec<PullItemConfig>,
    /// Tools every selected host must provide.
    #[ortho_config(default = Vec::new())]
    pub requirements: Vec<String>,
    /// Connection settings.
    #[ortho_config(skip_cli)]
    pub ssh: Option<SshSection>,
}

/// Errors raised while loading or interrogating the project document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a required field is missing or empty. The message names
    /// the file key so the fix is a one-line edit to `rr.yaml`.
    #[error("invalid configuration: {field} {problem}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        problem: String,
    },
    /// Raised when a named task does not exist.
    #[error("unknown task '{name}'; known tasks: {known}")]
    UnknownTask {
        /// Requested task name.
        name: String,
        /// Comma-separated known task names.
        known: String,
    },
    /// Raised when a step declares an unrecognised failure policy.
    #[error("invalid on_fail '{value}' in {field}: expected 'stop' or 'continue'")]
    InvalidOnFail {
        /// Dotted path of the offending step.
        field: String,
        /// Offending value.
        value: String,
    },
}

impl ProjectConfig {
    /// Loads configuration from defaults, discovered files, and environment
    /// variables without consuming process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("rr")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the document, returning the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for empty alias lists, empty
    /// directory templates, task bodies that declare both or neither form,
    /// steps without a command, and pull items without a source.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, host) in &self.hosts {
            if host.ssh.iter().all(|alias| alias.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    field: format!("hosts.{name}.ssh"),
                    problem: String::from("must list at least one alias"),
                });
            }
            if host.dir.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("hosts.{name}.dir"),
                    problem: String::from("must not be empty"),
                });
            }
        }

        for (name, body) in &self.tasks {
            Self::validate_task(name, body)?;
        }

        for (index, item) in self.pull.iter().enumerate() {
            if item.src.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("pull[{index}].src"),
                    problem: String::from("must not be empty"),
                });
            }
        }

        Ok(())
    }

    fn validate_task(name: &str, body: &TaskConfig) -> Result<(), ConfigError> {
        match (&body.run, &body.steps) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid {
                field: format!("tasks.{name}"),
                problem: String::from("declares both run and steps"),
            }),
            (None, None) => Err(ConfigError::Invalid {
                field: format!("tasks.{name}"),
                problem: String::from("declares neither run nor steps"),
            }),
            (Some(run), None) if run.trim().is_empty() => Err(ConfigError::Invalid {
                field: format!("tasks.{name}.run"),
                problem: String::from("must not be empty"),
            }),
            (None, Some(steps)) if steps.is_empty() => Err(ConfigError::Invalid {
                field: format!("tasks.{name}.steps"),
                problem: String::from("must list at least one step"),
            }),
            (None, Some(steps)) => {
                for (index, step) in steps.iter().enumerate() {
                    if step.run.trim().is_empty() {
                        return Err(ConfigError::Invalid {
                            field: format!("tasks.{name}.steps[{index}].run"),
                            problem: String::from("must not be empty"),
                        });
                    }
                }
                Ok(())
            }
            (Some(_), None) => Ok(()),
        }
    }

    /// Resolves a named task into its executable form.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTask`] when the name is not declared and
    /// [`ConfigError::InvalidOnFail`] for unrecognised failure policies.
    pub fn task(&self, name: &str) -> Result<Task, ConfigError> {
        let body = self.tasks.get(name).ok_or_else(|| ConfigError::UnknownTask {
            name: name.to_owned(),
            known: self
                .tasks
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        })?;

        if let Some(ref run) = body.run {
            return Ok(Task::Single(run.clone()));
        }

        let step_configs = body.steps.clone().unwrap_or_default();
        let mut steps = Vec::with_capacity(step_configs.len());
        for (index, step) in step_configs.iter().enumerate() {
            let on_fail = match step.on_fail.as_deref() {
                None | Some("") | Some("stop") => OnFail::Stop,
                Some("continue") => OnFail::Continue,
                Some(other) => {
                    return Err(ConfigError::InvalidOnFail {
                        field: format!("tasks.{name}.steps[{index}]"),
                        value: other.to_owned(),
                    });
                }
            };
            steps.push(Step {
                name: step.name.clone(),
                run: step.run.clone(),
                on_fail,
            });
        }
        Ok(Task::Steps(steps))
    }

    /// Returns the effective sync settings with defaults applied.
    #[must_use]
    pub fn sync_settings(&self) -> crate::sync::SyncSettings {
        let section = self.sync.clone().unwrap_or_default();
        crate::sync::SyncSettings {
            exclude: section.exclude,
            preserve: section.preserve,
            extra_flags: section.flags,
            git_aware: section.git_aware.unwrap_or(true),
            base_branch: section
                .base_branch
                .unwrap_or_else(|| String::from(DEFAULT_BASE_BRANCH)),
        }
    }

    /// Returns the effective connection settings with defaults applied.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        let section = self.ssh.clone().unwrap_or_default();
        SshSettings {
            connect_timeout_secs: section
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            config_file: section.config_file,
            local_fallback: section.local_fallback.unwrap_or(false),
        }
    }
}

/// Effective connection settings consumed by the selector.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Per-alias connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Alternative SSH configuration file, when configured.
    pub config_file: Option<String>,
    /// Whether the selector falls back to a local pseudo-connection.
    pub local_fallback: bool,
}
