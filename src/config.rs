// ⚙️ App Configuration - TOML file + compiled defaults
// Priority: command-line flag / environment variable (handled by clap in the
// binary), then the TOML file, then the defaults below.

use crate::error::ConfigError;
use crate::path::DEFAULT_DELIMITER;
use crate::reindex::{DEFAULT_BATCH_SIZE, DEFAULT_CURSOR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "part-taxonomy.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub profiles_dir: PathBuf,
    pub path_delimiter: String,
    pub batch_size: usize,
    pub workers: usize,
    pub cursor_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: PathBuf::from("catalog.db"),
            profiles_dir: PathBuf::from("profiles"),
            path_delimiter: DEFAULT_DELIMITER.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            cursor_name: DEFAULT_CURSOR.to_string(),
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub profiles_dir: Option<PathBuf>,
    pub path_delimiter: Option<String>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub cursor_name: Option<String>,
}

impl AppConfig {
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Read `path` if given (it must exist), otherwise `part-taxonomy.toml`
    /// in the working directory if present, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    tracing::debug!("No config file, using defaults");
                    return Ok(AppConfig::default());
                }
                fallback
            }
        };

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_toml_str(&content, &path.display().to_string())?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(v) = overrides.db_path {
            self.db_path = v;
        }
        if let Some(v) = overrides.profiles_dir {
            self.profiles_dir = v;
        }
        if let Some(v) = overrides.path_delimiter {
            self.path_delimiter = v;
        }
        if let Some(v) = overrides.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = overrides.workers {
            self.workers = v;
        }
        if let Some(v) = overrides.cursor_name {
            self.cursor_name = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            "db_path = \"/var/lib/parts/catalog.db\"\nworkers = 4\n",
            "inline",
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/parts/catalog.db"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.path_delimiter, " > ");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_overrides_win() {
        let config = AppConfig::default().with_overrides(ConfigOverrides {
            profiles_dir: Some(PathBuf::from("/etc/part-taxonomy/profiles")),
            cursor_name: Some("nightly".to_string()),
            ..Default::default()
        });
        assert_eq!(config.profiles_dir, PathBuf::from("/etc/part-taxonomy/profiles"));
        assert_eq!(config.cursor_name, "nightly");
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_load_file_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "path_delimiter = \" / \"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.path_delimiter, " / ");

        assert!(matches!(
            AppConfig::load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::Read { .. })
        ));

        std::fs::write(&path, "workers = \"many\"\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }
}
