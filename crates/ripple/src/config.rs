//! Runtime configuration, injected into a [`crate::stream::BindingContext`].
//!
//! ```toml
//! decoupling = "continuous"
//! window_grace_ms = 250
//! persist_by_default = false
//! first_stream_id = 1
//! ```

use crate::schedule::Millis;
use crate::stream::DecouplingMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_FIRST_STREAM_ID: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Used by decoupled streams that do not pick a mode.
    pub decoupling: DecouplingMode,
    /// Time a window stays open past its end.
    pub window_grace_ms: Millis,
    /// Stateful streams without an explicit id get a minted one and persist.
    pub persist_by_default: bool,
    pub first_stream_id: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            decoupling: DecouplingMode::Continuous,
            window_grace_ms: 0,
            persist_by_default: false,
            first_stream_id: DEFAULT_FIRST_STREAM_ID,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, error: std::io::Error },
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, error } => {
                write!(f, "cannot read config {}: {error}", path.display())
            }
            ConfigError::Parse(error) => write!(f, "invalid config: {error}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { error, .. } => Some(error),
            ConfigError::Parse(error) => Some(error),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml(&content)
    }
}
