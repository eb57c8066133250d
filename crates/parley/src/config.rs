//! Server configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) gives
//! a working local server:
//!
//! ```toml
//! bind_addr = "0.0.0.0:3000"
//! mute_dir = "/var/lib/parley/mutes"
//! mute_policy = "recipient_only"
//! handshake_timeout_secs = 10
//! idle_timeout_secs = 0
//!
//! [limits]
//! max_rolls = 100
//! max_sides = 1000000
//! max_message_len = 2000
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parley_room::DiceLimits;
use parley_session::{FileMuteStore, MemoryMuteStore, MutePolicy, MuteStore};
use serde::Deserialize;

/// Environment variable that overrides [`ServerConfig::bind_addr`].
pub const BIND_ADDR_ENV: &str = "PARLEY_BIND_ADDR";

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory for per-user mute lists. Mutes live in memory only when
    /// unset.
    pub mute_dir: Option<PathBuf>,
    pub mute_policy: MutePolicy,
    /// How long a new connection may take to send `Connect`.
    pub handshake_timeout_secs: u64,
    /// Disconnect clients that send nothing for this long. `0` disables.
    pub idle_timeout_secs: u64,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            mute_dir: None,
            mute_policy: MutePolicy::default(),
            handshake_timeout_secs: 10,
            idle_timeout_secs: 0,
            limits: LimitsConfig::default(),
        }
    }
}

/// Per-message limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_rolls: u32,
    pub max_sides: u32,
    /// Longest chat or private message accepted, in characters.
    pub max_message_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let dice = DiceLimits::default();
        Self {
            max_rolls: dice.max_rolls,
            max_sides: dice.max_sides,
            max_message_len: 2000,
        }
    }
}

impl LimitsConfig {
    pub fn dice(&self) -> DiceLimits {
        DiceLimits {
            max_rolls: self.max_rolls,
            max_sides: self.max_sides,
        }
    }
}

impl ServerConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV)
            && !addr.is_empty()
        {
            self.bind_addr = addr;
        }
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// `None` when idle disconnects are disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Builds the mute store this configuration asks for.
    pub fn mute_store(&self) -> Arc<dyn MuteStore> {
        match &self.mute_dir {
            Some(dir) => Arc::new(FileMuteStore::new(dir.clone())),
            None => Arc::new(MemoryMuteStore::new()),
        }
    }
}
