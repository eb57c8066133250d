//! Mute-list persistence.
//!
//! The room layer depends on the [`MuteStore`] trait only; the server
//! picks an implementation at startup:
//!
//! - [`MemoryMuteStore`] keeps lists for the life of the process
//! - [`FileMuteStore`] writes `<dir>/<hex(name)>.txt`, one muted name per line

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::SessionError;

/// Loads and saves a client's mute list, keyed by display name.
#[async_trait]
pub trait MuteStore: Send + Sync {
    /// Returns the names `name` has muted. A client with no saved list
    /// gets an empty one, not an error.
    async fn load_mutes(&self, name: &str) -> Result<Vec<String>, SessionError>;

    /// Replaces the saved list for `name`.
    async fn save_mutes(&self, name: &str, muted: &[String]) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// MemoryMuteStore
// ---------------------------------------------------------------------------

/// In-process mute store. Lists survive reconnects but not restarts.
#[derive(Debug, Default)]
pub struct MemoryMuteStore {
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryMuteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MuteStore for MemoryMuteStore {
    async fn load_mutes(&self, name: &str) -> Result<Vec<String>, SessionError> {
        Ok(self
            .lists
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_mutes(&self, name: &str, muted: &[String]) -> Result<(), SessionError> {
        self.lists
            .write()
            .await
            .insert(name.to_string(), muted.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileMuteStore
// ---------------------------------------------------------------------------

/// Stores each client's mute list as a text file in one directory.
#[derive(Debug, Clone)]
pub struct FileMuteStore {
    dir: PathBuf,
}

impl FileMuteStore {
    /// Uses `dir` for mute files. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file holding `name`'s list: the name's UTF-8 bytes as
    /// lowercase hex. Distinct names always get distinct files, and no
    /// name can escape the directory.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", hex::encode(name.as_bytes())))
    }
}

#[async_trait]
impl MuteStore for FileMuteStore {
    async fn load_mutes(&self, name: &str) -> Result<Vec<String>, SessionError> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(SessionError::Store {
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn save_mutes(&self, name: &str, muted: &[String]) -> Result<(), SessionError> {
        let store_err = |source| SessionError::Store {
            name: name.to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(store_err)?;

        let mut contents = String::new();
        for muted_name in muted {
            contents.push_str(muted_name);
            contents.push('\n');
        }
        let path = self.path_for(name);
        tokio::fs::write(&path, contents).await.map_err(store_err)?;
        tracing::debug!(client = name, path = %path.display(), "mute list saved");
        Ok(())
    }
}
