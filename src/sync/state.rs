//! Persisted sync state for the git-aware fast path.
//!
//! After every successful git-aware sync the `{branch, host, alias}` triple
//! is written to `<projectRoot>/.rr/sync-state.json`. Before a fast-path
//! sync the triple is compared against the current one; any mismatch (or a
//! missing or unreadable file) forces a full sync.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Directory under the project root that holds tool metadata.
pub const STATE_DIR: &str = ".rr";

/// File name of the sync-state document.
pub const STATE_FILE: &str = "sync-state.json";

/// Last successfully synced `{branch, host, alias}` triple.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SyncState {
    /// Branch the remote mirror was built from.
    pub branch: String,
    /// Host the mirror lives on.
    pub host: String,
    /// Alias the sync went through.
    pub alias: String,
}

/// Errors raised while persisting sync state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the state cannot be encoded.
    #[error("failed to encode sync state: {message}")]
    Encode {
        /// Serializer error message.
        message: String,
    },
}

/// Reads and writes the sync-state file under a project root.
#[derive(Clone, Debug)]
pub struct SyncStateStore {
    root: Utf8PathBuf,
}

impl SyncStateStore {
    /// Creates a store rooted at the project directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn path(&self) -> Utf8PathBuf {
        self.root.join(STATE_DIR).join(STATE_FILE)
    }

    /// Loads the persisted state.
    ///
    /// Absence and parse failures both yield `None`: stale or corrupt state
    /// must never block a sync, it only forces the full path.
    #[must_use]
    pub fn load(&self) -> Option<SyncState> {
        let dir = Dir::open_ambient_dir(&self.root, ambient_authority()).ok()?;
        let contents = dir
            .read_to_string(Utf8Path::new(STATE_DIR).join(STATE_FILE))
            .ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Persists `state`, replacing any previous file.
    ///
    /// The write goes to a temporary file first and is renamed into place so
    /// readers never observe a partially written document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the metadata directory cannot be created
    /// or written.
    pub fn save(&self, state: &SyncState) -> Result<(), StateError> {
        let state_dir = self.root.join(STATE_DIR);
        Dir::create_ambient_dir_all(&state_dir, ambient_authority()).map_err(|err| {
            StateError::Io {
                path: state_dir.clone(),
                message: err.to_string(),
            }
        })?;

        let dir = Dir::open_ambient_dir(&state_dir, ambient_authority()).map_err(|err| {
            StateError::Io {
                path: state_dir.clone(),
                message: err.to_string(),
            }
        })?;

        let rendered = serde_json::to_string_pretty(state).map_err(|err| StateError::Encode {
            message: err.to_string(),
        })?;

        let temp_name = format!("{STATE_FILE}.tmp");
        dir.write(&temp_name, rendered.as_bytes())
            .map_err(|err| StateError::Io {
                path: state_dir.join(&temp_name),
                message: err.to_string(),
            })?;
        dir.rename(&temp_name, &dir, STATE_FILE)
            .map_err(|err| StateError::Io {
                path: self.path(),
                message: err.to_string(),
            })
    }
}
