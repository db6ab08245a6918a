//! Roster persistence

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::network::PersistedState;
use crate::pending::lock;
use crate::{Error, Result};

/// Durable storage for one room's roster
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Load the persisted state, `None` if nothing was saved yet
    async fn load(&self) -> Result<Option<PersistedState>>;

    /// Replace the persisted state
    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// Remove all persisted state
    async fn destroy(&self) -> Result<()>;
}

/// Store that keeps the roster in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store as if a previous instance had saved `state`
    #[must_use]
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Last saved state
    #[must_use]
    pub fn snapshot(&self) -> Option<PersistedState> {
        lock(&self.state).clone()
    }
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *lock(&self.state) = Some(state.clone());
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        *lock(&self.state) = None;
        Ok(())
    }
}

/// Store that writes the roster as a JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a roster file exists
    ///
    /// # Errors
    ///
    /// Returns error if the filesystem cannot be queried
    pub async fn exists(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.path).await?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RosterStore for FileStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_str(&content).map_err(|e| {
            Error::Store(format!("corrupt roster file {}: {e}", self.path.display()))
        })?;
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a torn file
        let temp = self.temp_path();
        let content = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), peers = state.peers.len(), "roster saved");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
