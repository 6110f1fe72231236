//! Connection settings on disk
//!
//! Settings are stored as JSON. Every field is optional; missing fields take
//! the controller defaults.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::ConnectionConfig;

/// File name used under the user's config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors from loading or saving settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid settings JSON
    #[error("Invalid settings file {path}: {source}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A setting parsed but is out of range
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Dotted path of the offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}

impl ConnectionConfig {
    /// Load and validate settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ConnectionConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Write settings as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(io_err)
    }

    /// Reject settings that could never talk to a controller
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.baud_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settings.baud_rate",
                message: "must be non-zero".to_string(),
            });
        }
        if !(5..=8).contains(&self.settings.data_bits) {
            return Err(ConfigError::InvalidValue {
                field: "settings.data_bits",
                message: format!("{} is not between 5 and 8", self.settings.data_bits),
            });
        }
        if !(1..=2).contains(&self.settings.stop_bits) {
            return Err(ConfigError::InvalidValue {
                field: "settings.stop_bits",
                message: format!("{} is not 1 or 2", self.settings.stop_bits),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_ms",
                message: "must be non-zero".to_string(),
            });
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_len",
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-user settings path (`<config dir>/mmc/config.json`), given the
/// platform config directory
pub fn user_config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("mmc").join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckPolicy;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "port_name": "COM4", "timeout_ms": 500 }"#).unwrap();

        let config = ConnectionConfig::from_file(&path).unwrap();
        assert_eq!(config.port_name, "COM4");
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.settings.baud_rate, 38400);
        assert_eq!(config.ack_policy, AckPolicy::ErrorQuery);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = ConnectionConfig::for_port("/dev/ttyUSB0");
        config.ack_policy = AckPolicy::Reply;
        config.query_retries = 2;
        config.save(&path).unwrap();

        let loaded = ConnectionConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "timeout_ms": 0 }"#).unwrap();

        let err = ConnectionConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "timeout_ms", .. }));
    }

    #[test]
    fn test_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ConnectionConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = ConnectionConfig::from_file(Path::new("/nonexistent/mmc.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_user_config_path() {
        let path = user_config_path(Path::new("/home/me/.config"));
        assert_eq!(path, Path::new("/home/me/.config/mmc/config.json"));
    }
}
