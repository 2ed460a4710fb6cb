//! Host selection with alias fallback and session reuse.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::config::{ProjectConfig, SshSettings};
use crate::exec::CommandRunner;

use super::probe::{ProbeError, probe_alias};
use super::{Connection, ConnectionEvent, ConnectionObserver, Host, NullObserver};

/// Errors raised while resolving a connection.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SelectError {
    /// Raised when configuration declares no hosts at all.
    #[error("no hosts configured; add a hosts section to rr.yaml")]
    NoHosts,
    /// Raised when a named host does not exist.
    #[error("unknown host '{name}'; known hosts: {known}")]
    UnknownHost {
        /// Requested host name.
        name: String,
        /// Comma-separated known host names.
        known: String,
    },
    /// Raised when no host carries the requested tag.
    #[error("no host tagged '{tag}'; known tags: {known}")]
    UnknownTag {
        /// Requested tag.
        tag: String,
        /// Comma-separated known tags.
        known: String,
    },
    /// Raised when a host has no usable aliases.
    #[error("host '{host}' has no usable ssh aliases")]
    EmptyAliases {
        /// Offending host name.
        host: String,
    },
    /// Raised when every alias of a host failed and no local fallback is
    /// configured.
    #[error("could not connect to '{host}'; attempted aliases: {}", format_attempts(.attempts))]
    AllAliasesFailed {
        /// Host every alias of which failed.
        host: String,
        /// One probe failure per attempted alias, in order.
        attempts: Vec<ProbeError>,
    },
    /// Raised when `select_next` exhausted the host pool.
    #[error("no reachable host; attempted: {}", .attempted.join(", "))]
    NoReachableHost {
        /// Hosts attempted, in order.
        attempted: Vec<String>,
    },
}

fn format_attempts(attempts: &[ProbeError]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves connections against a host pool, caching at most one.
///
/// The selector is internally mutexed: concurrent calls observe a
/// consistent cache, and a single selection holds the lock for up to
/// `timeout × aliasCount` while probing. This serialisation is what keeps
/// one host from accumulating duplicate sessions.
pub struct Selector<R: CommandRunner + Clone> {
    hosts: BTreeMap<String, Host>,
    settings: SshSettings,
    runner: R,
    observer: Arc<dyn ConnectionObserver>,
    cached: Mutex<Option<Connection<R>>>,
}

impl<R: CommandRunner + Clone> Selector<R> {
    /// Creates a selector over an explicit host map.
    #[must_use]
    pub fn new(hosts: BTreeMap<String, Host>, settings: SshSettings, runner: R) -> Self {
        Self {
            hosts,
            settings,
            runner,
            observer: Arc::new(NullObserver),
            cached: Mutex::new(None),
        }
    }

    /// Creates a selector from the project configuration.
    #[must_use]
    pub fn from_config(config: &ProjectConfig, runner: R) -> Self {
        let hosts = config
            .hosts
            .iter()
            .map(|(name, host_config)| (name.clone(), Host::from_config(name, host_config)))
            .collect();
        Self::new(hosts, config.ssh_settings(), runner)
    }

    /// Replaces the event observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Resolves a connection, preferring `preferred` when given.
    ///
    /// A cached connection is reused when it still answers a trivial
    /// session and either belongs to the preferred host, no preference was
    /// given, or it is a local fallback. Otherwise the cached connection is
    /// closed and a fresh one is established.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError`] when the host cannot be resolved or no alias
    /// answers.
    pub fn select(&self, preferred: Option<&str>) -> Result<Connection<R>, SelectError> {
        let wanted_name = preferred.filter(|name| !name.is_empty());
        let mut slot = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = slot.as_ref() {
            let wanted = wanted_name.is_none_or(|name| cached.name() == name);
            if (wanted || cached.is_local()) && cached.is_alive() {
                self.observer.on_event(&ConnectionEvent::CacheHit {
                    host: cached.name().to_owned(),
                });
                return Ok(cached.clone());
            }
            cached.close();
            *slot = None;
        }

        let host = self.resolve(wanted_name)?.clone();
        let connection = self.connect_host(&host)?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Resolves a connection to a host carrying `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError::UnknownTag`] (listing every known tag) when no
    /// host matches, or any probing error from the filtered selection.
    pub fn select_by_tag(&self, tag: &str) -> Result<Connection<R>, SelectError> {
        let tagged: Vec<&Host> = self
            .hosts
            .values()
            .filter(|host| host.has_tag(tag))
            .collect();

        if tagged.is_empty() {
            let mut known: Vec<&str> = self
                .hosts
                .values()
                .flat_map(|host| host.tags.iter().map(String::as_str))
                .collect();
            known.sort_unstable();
            known.dedup();
            return Err(SelectError::UnknownTag {
                tag: tag.to_owned(),
                known: known.join(", "),
            });
        }

        let mut slot = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = slot.as_ref() {
            if cached.is_alive() {
                self.observer.on_event(&ConnectionEvent::CacheHit {
                    host: cached.name().to_owned(),
                });
                return Ok(cached.clone());
            }
            cached.close();
            *slot = None;
        }

        let host = (*tagged.first().ok_or(SelectError::NoHosts)?).clone();
        let connection = self.connect_host(&host)?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Establishes one fresh connection to `name`, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError`] when the host is unknown or unreachable.
    pub fn select_host(&self, name: &str) -> Result<Connection<R>, SelectError> {
        let host = self.resolve(Some(name))?.clone();
        self.connect_host(&host)
    }

    /// Returns the first host, in deterministic order, that connects and is
    /// not listed in `skip`. The cache is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SelectError::NoReachableHost`] when every candidate fails.
    pub fn select_next(&self, skip: &[String]) -> Result<Connection<R>, SelectError> {
        let mut attempted = Vec::new();
        for host in self.hosts.values() {
            if skip.contains(&host.name) {
                continue;
            }
            attempted.push(host.name.clone());
            match self.connect_host(host) {
                Ok(connection) => return Ok(connection),
                Err(err) => log::debug!("skipping {}: {err}", host.name),
            }
        }
        Err(SelectError::NoReachableHost { attempted })
    }

    /// Closes the cached connection, if any.
    pub fn close(&self) {
        let mut slot = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = slot.take() {
            cached.close();
        }
    }

    fn resolve(&self, preferred: Option<&str>) -> Result<&Host, SelectError> {
        match preferred {
            Some(name) if !name.is_empty() => {
                self.hosts.get(name).ok_or_else(|| SelectError::UnknownHost {
                    name: name.to_owned(),
                    known: self
                        .hosts
                        .keys()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
            // BTreeMap iteration is alphabetical, which keeps the unnamed
            // choice repeatable across runs.
            _ => self.hosts.values().next().ok_or(SelectError::NoHosts),
        }
    }

    fn connect_host(&self, host: &Host) -> Result<Connection<R>, SelectError> {
        if host.aliases.is_empty() {
            return Err(SelectError::EmptyAliases {
                host: host.name.clone(),
            });
        }

        let mut attempts = Vec::new();
        for (index, alias) in host.aliases.iter().enumerate() {
            self.observer.on_event(&ConnectionEvent::Trying {
                alias: alias.clone(),
            });

            match probe_alias(&self.runner, &self.settings, alias) {
                Ok((client, latency)) => {
                    self.observer.on_event(&ConnectionEvent::Connected {
                        alias: alias.clone(),
                        latency,
                        fallback: index > 0,
                    });
                    return Ok(Connection::remote(host.clone(), alias, client, latency));
                }
                Err(probe_error) => {
                    self.observer.on_event(&ConnectionEvent::Failed {
                        alias: alias.clone(),
                        reason: probe_error.reason,
                        cause: probe_error.cause.clone(),
                    });
                    attempts.push(probe_error);
                }
            }
        }

        if self.settings.local_fallback {
            self.observer.on_event(&ConnectionEvent::LocalFallback);
            return Ok(Connection::local(host.clone()));
        }

        Err(SelectError::AllAliasesFailed {
            host: host.name.clone(),
            attempts,
        })
    }
}
