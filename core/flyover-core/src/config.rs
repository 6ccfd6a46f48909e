//! Configuration loading.
//!
//! Reads `~/.flyover/config.toml`. A missing file yields defaults; a present but
//! malformed file is an error so a typo never silently reverts to defaults.
//!
//! ```toml
//! [store]
//! path = "/var/lib/flyover/sessions.db"
//!
//! [retry]
//! max_attempts = 5
//! backoff_step_ms = 10
//! backoff_max_ms = 100
//!
//! [daemon]
//! socket = "/run/flyover/daemon.sock"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::store::RetryPolicy;

const DATA_DIR: &str = ".flyover";
const CONFIG_FILE: &str = "config.toml";
const DB_RELATIVE_PATH: &str = "daemon/sessions.db";
const SOCKET_NAME: &str = "daemon.sock";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FlyoverConfig {
    pub store: StoreConfig,
    pub retry: RetryPolicy,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub socket: Option<PathBuf>,
}

impl FlyoverConfig {
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(DB_RELATIVE_PATH)),
        }
    }

    pub fn socket_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.daemon.socket {
            Some(path) => Ok(path.clone()),
            None => default_socket_path(),
        }
    }
}

/// Returns `~/.flyover`.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(DATA_DIR))
        .ok_or(ConfigError::HomeDirNotFound)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join(CONFIG_FILE))
}

pub fn default_socket_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join(SOCKET_NAME))
}

pub fn load_config(path: Option<PathBuf>) -> Result<FlyoverConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(FlyoverConfig::default());
    }

    parse_config_file(&config_path)
}

fn parse_config_file(path: &Path) -> Result<FlyoverConfig, ConfigError> {
    let content = fs_err::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<FlyoverConfig>(&content).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(path)).expect("load config");
        assert_eq!(config, FlyoverConfig::default());
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[store]
path = "/tmp/flyover/sessions.db"

[retry]
max_attempts = 9
backoff_step_ms = 3

[daemon]
socket = "/tmp/flyover/daemon.sock"
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load config");
        assert_eq!(
            config.db_path().expect("db path"),
            PathBuf::from("/tmp/flyover/sessions.db")
        );
        assert_eq!(
            config.socket_path().expect("socket path"),
            PathBuf::from("/tmp/flyover/daemon.sock")
        );
        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.retry.backoff_step_ms, 3);
        assert_eq!(config.retry.backoff_max_ms, 100);
    }

    #[test]
    fn load_config_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[retry]\nmax_attempts = \"many\"\n").expect("write config");

        let err = load_config(Some(path)).expect_err("malformed config");
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[store]\nurl = \"firestore://\"\n").expect("write config");

        assert!(load_config(Some(path)).is_err());
    }
}
