//! Client connection configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use it2_protocol::MAX_PAYLOAD_SIZE;

use crate::error::ConfigError;

/// Default loopback address of the terminal's WebSocket listener
pub const DEFAULT_TCP_ADDRESS: &str = "localhost:1912";

/// Default advisory name shown in the terminal's scripting console
pub const DEFAULT_ADVISORY_NAME: &str = "it2-rs";

/// Socket location relative to the home directory
const SOCKET_RELATIVE_PATH: &str = "Library/Application Support/iTerm2/private/socket";

/// Configuration for a connection to the terminal
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Unix socket to prefer when it exists (defaults to the terminal's
    /// private socket under the home directory)
    pub socket_path: Option<PathBuf>,

    /// Fallback `host:port` when the socket is absent
    pub tcp_address: String,

    /// Advisory client name sent with the handshake
    pub advisory_name: String,

    /// Library version string sent with the handshake
    pub library_version: String,

    /// Authentication cookie (falls back to `ITERM2_COOKIE`)
    pub cookie: Option<String>,

    /// Session correlation key (falls back to `ITERM2_KEY`)
    pub key: Option<String>,

    /// Directory for socket aliases (defaults to the OS temp dir)
    pub alias_dir: Option<PathBuf>,

    /// Upper bound on dial plus handshake
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Largest frame payload accepted in either direction
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            tcp_address: DEFAULT_TCP_ADDRESS.to_string(),
            advisory_name: DEFAULT_ADVISORY_NAME.to_string(),
            library_version: format!("rust {}", env!("CARGO_PKG_VERSION")),
            cookie: None,
            key: None,
            alias_dir: None,
            connect_timeout: Duration::from_secs(10),
            max_frame_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        super::load_config(path)
    }

    /// Load the default config file, or defaults if there is none
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load(&super::default_config_path()) {
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Unix socket path to probe, explicit or default
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.socket_path.clone().or_else(default_socket_path)
    }

    /// Directory where socket aliases are created
    pub fn alias_dir(&self) -> PathBuf {
        self.alias_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("socket_path", &self.socket_path)
            .field("tcp_address", &self.tcp_address)
            .field("advisory_name", &self.advisory_name)
            .field("library_version", &self.library_version)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("alias_dir", &self.alias_dir)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

/// Durations as a whole number of milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Get the terminal's default private socket path
///
/// Returns `~/Library/Application Support/iTerm2/private/socket`, or `None`
/// when the home directory is unknown.
pub fn default_socket_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SOCKET_RELATIVE_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::save_config;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.tcp_address, "localhost:1912");
        assert_eq!(config.advisory_name, "it2-rs");
        assert!(config.library_version.starts_with("rust "));
        assert_eq!(config.max_frame_size, MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "advisory_name = \"deploy-bot\"\nconnect_timeout = 1500\n").unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.advisory_name, "deploy-bot");
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.tcp_address, DEFAULT_TCP_ADDRESS);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ClientConfig {
            socket_path: Some(PathBuf::from("/tmp/iterm.sock")),
            cookie: Some("c00k1e".to_string()),
            ..Default::default()
        };

        save_config(&path, &config).unwrap();
        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.socket_path, config.socket_path);
        assert_eq!(loaded.cookie.as_deref(), Some("c00k1e"));
    }

    #[test]
    fn test_timeout_written_as_millis() {
        let config = ClientConfig {
            connect_timeout: Duration::from_millis(2500),
            ..Default::default()
        };
        let rendered = toml::to_string(&config).unwrap();
        assert!(rendered.contains("connect_timeout = 2500"));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = ClientConfig::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ClientConfig {
            cookie: Some("super-secret-cookie".to_string()),
            key: Some("super-secret-key".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_explicit_socket_path_wins() {
        let config = ClientConfig {
            socket_path: Some(PathBuf::from("/run/custom.sock")),
            ..Default::default()
        };
        assert_eq!(config.socket_path(), Some(PathBuf::from("/run/custom.sock")));
    }
}
