//! Process-wide connection cache keyed by host name.
//!
//! The cache holds at most one connection per host. `get` health-checks the
//! fetched connection outside the lock and re-locks to evict a dead entry,
//! so a concurrent `insert` for the same host is never clobbered by a stale
//! eviction.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::exec::{CommandRunner, ProcessCommandRunner};

use super::Connection;

/// Map from host name to live connection; at most one entry per key.
#[derive(Debug, Default)]
pub struct ConnectionCache<R> {
    entries: Mutex<HashMap<String, Connection<R>>>,
}

impl<R: CommandRunner> ConnectionCache<R> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached connection for `name` when it is still alive.
    ///
    /// Dead entries are closed and evicted; local connections are always
    /// considered alive.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Connection<R>> {
        let candidate = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.get(name).cloned()
        };
        let connection = candidate?;

        // The health check runs a real session; keep it outside the lock.
        if connection.is_alive() {
            return Some(connection);
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let still_same = entries
            .get(name)
            .is_some_and(|current| current.shares_client_with(&connection));
        if still_same && let Some(evicted) = entries.remove(name) {
            evicted.close();
        }
        None
    }

    /// Stores `connection` under its host name, closing any previous entry.
    pub fn insert(&self, connection: Connection<R>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = entries.insert(connection.name().to_owned(), connection) {
            previous.close();
        }
    }

    /// Removes and returns the entry for `name` without closing it.
    #[must_use]
    pub fn remove(&self, name: &str) -> Option<Connection<R>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(name)
    }

    /// Closes and drops every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, connection) in entries.drain() {
            connection.close();
        }
    }

    /// Returns the number of cached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns the process-wide cache used by the real runner.
#[must_use]
pub fn global_cache() -> &'static ConnectionCache<ProcessCommandRunner> {
    static CACHE: OnceLock<ConnectionCache<ProcessCommandRunner>> = OnceLock::new();
    CACHE.get_or_init(ConnectionCache::new)
}
