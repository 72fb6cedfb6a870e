//! User settings, read from `$XDG_CONFIG_HOME/mdedit/config.toml`.

use std::fmt;
use std::fs;
use std::io;
use std::path;

use serde_derive::Deserialize;
use tracing::{event, Level};

use crate::model::controller;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub indent: usize, /* spaces per level, 0 for a single line */
    pub strict_output: bool, /* refuse to serialize invalid nodes */
    pub log_level: String,
    pub declare_all_namespaces: bool,
    pub history_limit: usize, /* undo steps */
}

#[derive(Debug)]
pub enum ConfigError {
    Io(path::PathBuf, io::Error),
    Syntax(path::PathBuf, toml::de::Error),
    Xdg(xdg::BaseDirectoriesError),
}

impl Default for Config {
    fn default() -> Config {
        Config {
            indent: 2,
            strict_output: false,
            log_level: "info".to_string(),
            declare_all_namespaces: false,
            history_limit: controller::DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(source)
    }

    /// Reads `path`. A missing file is not an error and yields the defaults.
    pub fn load_from(path: &path::Path) -> Result<Config, ConfigError> {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                event!(Level::DEBUG, "no config at {}, using defaults", path.display());
                return Ok(Config::default());
            },
            Err(e) => return Err(ConfigError::Io(path.to_path_buf(), e)),
        };

        let config = Config::from_toml(&source).map_err(|e| ConfigError::Syntax(path.to_path_buf(), e))?;
        event!(Level::DEBUG, "loaded config from {}", path.display());
        Ok(config)
    }

    /// Reads the config from the XDG config directory.
    pub fn load() -> Result<Config, ConfigError> {
        let dirs = xdg::BaseDirectories::with_prefix("mdedit")?;

        match dirs.find_config_file("config.toml") {
            Some(path) => Config::load_from(&path),
            None => Ok(Config::default()),
        }
    }
}

impl From<xdg::BaseDirectoriesError> for ConfigError {
    fn from(e: xdg::BaseDirectoriesError) -> ConfigError {
        ConfigError::Xdg(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "could not read {}: {}", path.display(), e),
            ConfigError::Syntax(path, e) => write!(f, "invalid config in {}: {}", path.display(), e),
            ConfigError::Xdg(e) => write!(f, "could not locate config directory: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Syntax(_, e) => Some(e),
            ConfigError::Xdg(e) => Some(e),
        }
    }
}
