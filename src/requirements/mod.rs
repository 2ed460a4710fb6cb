//! Parallel remote checks for project-required tools.
//!
//! Each required tool is probed with `command -v` on the selected host, one
//! thread per tool, joined on completion. Results are memoised in a
//! process-wide cache keyed by `(host, tool)` so repeated tasks against the
//! same host skip the round trips.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread;

use crate::exec::{CommandRunner, ExecError};
use crate::host::Connection;
use crate::toolcheck::can_install;

/// Outcome of one requirement probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequirementStatus {
    /// Whether the tool resolves on the host.
    pub satisfied: bool,
    /// Absolute path reported by `command -v`, when satisfied.
    pub path: Option<String>,
    /// Whether the install catalog can offer a fix.
    pub can_install: bool,
}

/// Memoises requirement probes per `(host, tool)` pair.
#[derive(Debug, Default)]
pub struct RequirementCache {
    entries: Mutex<HashMap<(String, String), RequirementStatus>>,
}

impl RequirementCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoised status for `(host, tool)`, if any.
    #[must_use]
    pub fn get(&self, host: &str, tool: &str) -> Option<RequirementStatus> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&(host.to_owned(), tool.to_owned())).cloned()
    }

    /// Stores the status for `(host, tool)`.
    pub fn insert(&self, host: &str, tool: &str, status: RequirementStatus) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert((host.to_owned(), tool.to_owned()), status);
    }
}

/// Returns the process-wide requirement cache.
#[must_use]
pub fn global_requirement_cache() -> &'static RequirementCache {
    static CACHE: OnceLock<RequirementCache> = OnceLock::new();
    CACHE.get_or_init(RequirementCache::new)
}

/// Probes every tool in `tools` on the connection's host, in parallel.
///
/// Local connections satisfy every requirement trivially: the command runs
/// in the user's own environment, where a genuinely missing tool surfaces
/// on its own. Results come back in the order of `tools`.
///
/// # Errors
///
/// Returns the first [`ExecError`] raised by a probe; individual missing
/// tools are not errors but unsatisfied statuses.
pub fn check_requirements<R: CommandRunner + Sync + Send>(
    connection: &Connection<R>,
    tools: &[String],
    cache: &RequirementCache,
) -> Result<Vec<(String, RequirementStatus)>, ExecError> {
    let host = connection.name().to_owned();

    let probes: Vec<Result<(String, RequirementStatus), ExecError>> = thread::scope(|scope| {
        let handles: Vec<_> = tools
            .iter()
            .map(|tool| {
                let host_name = host.clone();
                scope.spawn(move || {
                    if let Some(cached) = cache.get(&host_name, tool) {
                        return Ok((tool.clone(), cached));
                    }
                    let status = probe_tool(connection, tool)?;
                    cache.insert(&host_name, tool, status.clone());
                    Ok((tool.clone(), status))
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().map_err(|_| ExecError::Io {
                    program: String::from("requirement probe"),
                    message: String::from("probe thread panicked"),
                })?
            })
            .collect()
    });

    probes.into_iter().collect()
}

fn probe_tool<R: CommandRunner>(
    connection: &Connection<R>,
    tool: &str,
) -> Result<RequirementStatus, ExecError> {
    let Some(client) = connection.client() else {
        return Ok(RequirementStatus {
            satisfied: true,
            path: None,
            can_install: can_install(tool),
        });
    };

    let output = client.exec(&format!("command -v {tool} 2>/dev/null"))?;
    let path = output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToOwned::to_owned);

    Ok(RequirementStatus {
        satisfied: output.is_success() && path.is_some(),
        path,
        can_install: can_install(tool),
    })
}
