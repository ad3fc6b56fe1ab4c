//! Configuration file handling
//!
//! Settings come from a TOML file; command-line flags take precedence over
//! file values. Without `--config` the file is looked up in the platform
//! config directory and silently skipped when absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use echolink_net::{ClientSettings, ListenerSettings, DEFAULT_PORT};
use serde::Deserialize;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listener port; validated by the listener like any user input
    #[serde(default = "default_server_port")]
    pub port: i64,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Absent means unlimited
    pub max_clients: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind_host: default_bind_host(),
            max_clients: None,
            idle_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            bind_host: self.bind_host.clone(),
            max_clients: self.max_clients,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// `[client]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_port(),
            connect_timeout_secs: None,
            read_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            read_timeout: self.read_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_server_port() -> i64 {
    i64::from(DEFAULT_PORT)
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from `path`, or from the default location if none is given.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `<config dir>/config.toml` for this platform
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "echolink", "echolink")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.server.bind_host, "0.0.0.0");
        assert_eq!(config.server.max_clients, None);
        assert_eq!(config.client.host, "127.0.0.1");
        assert_eq!(config.client.port, 7070);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            port = 9000
            bind_host = "127.0.0.1"
            max_clients = 4
            idle_timeout_secs = 300

            [client]
            host = "example.org"
            port = 9000
            connect_timeout_secs = 5
            read_timeout_secs = 10

            [logging]
            level = "debug"
            "#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_clients, Some(4));
        assert_eq!(config.client.host, "example.org");
        assert_eq!(config.logging.level, "debug");

        let listener = config.server.listener_settings();
        assert_eq!(listener.bind_host, "127.0.0.1");
        assert_eq!(listener.idle_timeout, Some(Duration::from_secs(300)));

        let client = config.client.client_settings();
        assert_eq!(client.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(client.read_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nmax_clients = 2\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.max_clients, Some(2));
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.client.port, 7070);
        assert_eq!(config.client.client_settings().read_timeout, None);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            Config::load(Some(path.as_path())),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
