//! Configuration files
//!
//! Configuration lives in `<config dir>/it2/config.toml`. Every field has a
//! default, so a partial file is valid and a missing one means defaults.

mod client;

pub use client::{default_socket_path, ClientConfig, DEFAULT_ADVISORY_NAME, DEFAULT_TCP_ADDRESS};

use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ConfigError;

/// Directory holding it2's configuration
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("it2")
}

/// Path of the default configuration file
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Read a TOML configuration file
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ConfigError::NotFound(path.to_path_buf())
        } else {
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    Ok(toml::from_str(&content)?)
}

/// Write a TOML configuration file, creating parent directories
///
/// The file is written next to its destination and renamed into place, so
/// readers never observe a partial file.
pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let staging = path.with_extension("toml.partial");
    std::fs::write(&staging, content).map_err(io_error)?;
    std::fs::rename(&staging, path).map_err(io_error)
}
