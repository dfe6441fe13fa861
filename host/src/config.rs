//! Host Configuration
//!
//! Layered configuration: built-in defaults, then an optional YAML file,
//! then `ATRIUM_*` environment variables (highest precedence). `main` loads
//! `.env` via dotenvy before reading, so local overrides work without
//! exporting anything.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Host configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Directory scanned for plugin directories
    pub plugins_root: PathBuf,

    /// Directory holding per-schema-context SQLite files
    pub data_dir: PathBuf,

    /// Directory the build pipeline writes generated artifacts into
    pub generated_dir: PathBuf,

    /// File name of the host's own database, created under `data_dir`
    pub database_file: String,

    /// Consecutive load failures before a plugin is marked broken
    pub broken_threshold: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("plugins"),
            data_dir: PathBuf::from("data"),
            generated_dir: PathBuf::from("generated"),
            database_file: "atrium.db".to_string(),
            broken_threshold: 3,
        }
    }
}

impl HostConfig {
    /// Load from defaults, an optional YAML file, then the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file over the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `ATRIUM_*` environment variables.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ATRIUM_PLUGINS_ROOT") {
            self.plugins_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ATRIUM_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ATRIUM_GENERATED_DIR") {
            self.generated_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ATRIUM_DATABASE_FILE") {
            self.database_file = v;
        }
        if let Ok(v) = std::env::var("ATRIUM_BROKEN_THRESHOLD") {
            match v.parse() {
                Ok(parsed) => self.broken_threshold = parsed,
                Err(_) => {
                    tracing::warn!(value = %v, "Ignoring non-numeric ATRIUM_BROKEN_THRESHOLD");
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broken_threshold == 0 {
            return Err(ConfigError::Invalid(
                "broken_threshold must be at least 1".to_string(),
            ));
        }
        if self.database_file.is_empty() {
            return Err(ConfigError::Invalid(
                "database_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the host's own database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}
