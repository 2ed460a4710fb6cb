//! Host pool model, SSH probing, selection, and connection caching.
//!
//! A [`Host`] is a declarative record from configuration; a [`Connection`]
//! is a live (or local pseudo) handle produced by the [`Selector`]. The
//! selector probes aliases in declared order, reuses a cached connection
//! when it is still healthy, and optionally falls back to a local
//! connection when every alias fails.

mod cache;
mod probe;
mod selector;

pub use cache::{ConnectionCache, global_cache};
pub use probe::{ProbeError, ProbeReason, classify_failure};
pub use selector::{SelectError, Selector};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::HostConfig;
use crate::exec::{CommandRunner, SshClient};

/// Declarative description of one remote host, read-only after load.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Host {
    /// Host name as declared in configuration.
    pub name: String,
    /// SSH aliases tried in declared order.
    pub aliases: Vec<String>,
    /// Remote directory template; may embed `${BRANCH}` and `${PROJECT}`.
    pub dir: String,
    /// Shell invocation prefix (including `-c`) used to wrap remote commands.
    pub shell: Option<String>,
    /// Commands chained before each task command.
    pub setup_commands: Vec<String>,
    /// Labels used by tag-based selection.
    pub tags: Vec<String>,
}

impl Host {
    /// Builds the runtime view of a configured host.
    #[must_use]
    pub fn from_config(name: &str, config: &HostConfig) -> Self {
        Self {
            name: name.to_owned(),
            aliases: config
                .ssh
                .iter()
                .filter(|alias| !alias.trim().is_empty())
                .cloned()
                .collect(),
            dir: config.dir.clone(),
            shell: config.shell.clone(),
            setup_commands: config.setup_commands.clone(),
            tags: config.tags.clone(),
        }
    }

    /// Returns `true` when the host carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|existing| existing == tag)
    }

    /// Expands `${BRANCH}` and `${PROJECT}` in the directory template.
    #[must_use]
    pub fn expand_dir(&self, branch: &str, project: &str) -> String {
        self.dir
            .replace("${BRANCH}", branch)
            .replace("${PROJECT}", project)
    }
}

/// Event emitted while the selector resolves a connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    /// A probe for `alias` is starting.
    Trying {
        /// Alias being probed.
        alias: String,
    },
    /// The probe for `alias` failed.
    Failed {
        /// Alias that failed.
        alias: String,
        /// Categorised failure reason.
        reason: ProbeReason,
        /// Underlying error text.
        cause: String,
    },
    /// A connection was established.
    Connected {
        /// Alias that answered.
        alias: String,
        /// Wall-clock latency of the probe.
        latency: Duration,
        /// Whether a prior alias had to be skipped.
        fallback: bool,
    },
    /// A cached connection was reused.
    CacheHit {
        /// Host whose connection was reused.
        host: String,
    },
    /// Every alias failed and the selector returned a local connection.
    LocalFallback,
}

impl ConnectionEvent {
    /// Renders the event as a short human-readable message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Trying { alias } => format!("trying {alias}…"),
            Self::Failed {
                alias,
                reason,
                cause,
            } => format!("{alias} failed: {reason} ({cause})"),
            Self::Connected {
                alias,
                latency,
                fallback,
            } => {
                let suffix = if *fallback { " (fallback)" } else { "" };
                format!("connected to {alias} in {} ms{suffix}", latency.as_millis())
            }
            Self::CacheHit { host } => format!("reusing connection to {host}"),
            Self::LocalFallback => String::from("all aliases failed; running locally"),
        }
    }
}

/// Observer for [`ConnectionEvent`]s. Callbacks must not block the selector.
pub trait ConnectionObserver: Send + Sync {
    /// Called for each selection lifecycle event, in happen-before order
    /// with respect to the returned connection.
    fn on_event(&self, event: &ConnectionEvent);
}

/// Observer that ignores every event (quiet mode).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl ConnectionObserver for NullObserver {
    fn on_event(&self, _event: &ConnectionEvent) {}
}

#[derive(Debug)]
struct ConnectionInner<R> {
    host: Host,
    alias: String,
    latency: Duration,
    client: Option<SshClient<R>>,
    closed: AtomicBool,
}

/// Live or local pseudo connection to a host.
///
/// Cheap to clone: clones share the underlying client, which is what gives
/// cache hits their identity guarantee. The client is closed at most once
/// no matter how many clones call [`Connection::close`].
#[derive(Debug)]
pub struct Connection<R> {
    inner: Arc<ConnectionInner<R>>,
}

impl<R> Clone for Connection<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: CommandRunner> Connection<R> {
    /// Creates a remote connection from a successful probe.
    #[must_use]
    pub fn remote(host: Host, alias: &str, client: SshClient<R>, latency: Duration) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                host,
                alias: alias.to_owned(),
                latency,
                client: Some(client),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a local pseudo-connection for fallback execution.
    #[must_use]
    pub fn local(host: Host) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                host,
                alias: String::from("local"),
                latency: Duration::ZERO,
                client: None,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the host name this connection belongs to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.host.name
    }

    /// Returns the alias the connection was established through.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    /// Returns the declarative host record.
    #[must_use]
    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    /// Returns the latency measured when the connection was probed.
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.inner.latency
    }

    /// Returns `true` for local pseudo-connections.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.inner.client.is_none()
    }

    /// Returns the SSH client, or `None` for local connections.
    #[must_use]
    pub fn client(&self) -> Option<&SshClient<R>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }
        self.inner.client.as_ref()
    }

    /// Returns `true` when the session still answers. Local connections are
    /// always considered alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        self.inner
            .client
            .as_ref()
            .map_or(true, SshClient::is_alive)
    }

    /// Closes the connection. Subsequent calls are no-ops.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ref client) = self.inner.client {
            client.close_master();
        }
    }

    /// Returns `true` when both handles share the same underlying client.
    #[must_use]
    pub fn shares_client_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests;
