//! Handshake authentication
//!
//! The terminal authenticates scripts at WebSocket upgrade time. The client
//! attaches a fixed set of headers to the upgrade request:
//!
//! - `origin` and the `api.iterm2.com` subprotocol, which the terminal
//!   requires before it will accept the upgrade
//! - an advisory client name and library version, shown in the scripting
//!   console
//! - `x-iterm2-disable-auth-ui: false`
//! - an optional cookie and key, which let a script launched by the terminal
//!   skip the interactive permission prompt
//!
//! The cookie and key come from configuration or, when not configured, from
//! the `ITERM2_COOKIE` and `ITERM2_KEY` environment variables that the
//! terminal sets for scripts it launches.

use std::fmt;

use crate::config::ClientConfig;

/// WebSocket subprotocol spoken by the terminal
pub const SUBPROTOCOL: &str = "api.iterm2.com";

/// Origin presented with the upgrade request
pub const ORIGIN: &str = "ws://localhost/";

/// Environment variable holding the authentication cookie
pub const COOKIE_ENV: &str = "ITERM2_COOKIE";

/// Environment variable holding the session correlation key
pub const KEY_ENV: &str = "ITERM2_KEY";

/// Optional secrets presented during the handshake
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication cookie
    pub cookie: Option<String>,
    /// Session correlation key
    pub key: Option<String>,
}

impl Credentials {
    /// Resolve credentials from configuration, then the process environment
    pub fn resolve(config: &ClientConfig) -> Self {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    /// Resolve credentials using a custom environment lookup
    ///
    /// Empty values count as absent, both in the config and the environment.
    pub fn resolve_with<F>(config: &ClientConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |configured: &Option<String>, env: &str| {
            configured
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(env).filter(|v| !v.is_empty()))
        };

        Self {
            cookie: pick(&config.cookie, COOKIE_ENV),
            key: pick(&config.key, KEY_ENV),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything sent out-of-band with the WebSocket upgrade
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Library version string
    pub library_version: String,
    /// Advisory client name
    pub advisory_name: String,
    /// Optional secrets
    pub credentials: Credentials,
}

impl Handshake {
    /// Build the handshake for a configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            library_version: config.library_version.clone(),
            advisory_name: config.advisory_name.clone(),
            credentials: Credentials::resolve(config),
        }
    }

    /// Header fields to attach to the upgrade request
    ///
    /// Names are lowercase so they can be used as static header names.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("origin", ORIGIN.to_string()),
            ("sec-websocket-protocol", SUBPROTOCOL.to_string()),
            ("x-iterm2-library-version", self.library_version.clone()),
            ("x-iterm2-disable-auth-ui", "false".to_string()),
            ("x-iterm2-advisory-name", self.advisory_name.clone()),
        ];

        if let Some(cookie) = &self.credentials.cookie {
            headers.push(("x-iterm2-cookie", cookie.clone()));
        }
        if let Some(key) = &self.credentials.key {
            headers.push(("x-iterm2-key", key.clone()));
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_config_takes_precedence_over_env() {
        let config = ClientConfig {
            cookie: Some("from-config".to_string()),
            ..Default::default()
        };
        let creds = Credentials::resolve_with(&config, |name| match name {
            COOKIE_ENV => Some("from-env".to_string()),
            KEY_ENV => Some("env-key".to_string()),
            _ => None,
        });

        assert_eq!(creds.cookie.as_deref(), Some("from-config"));
        assert_eq!(creds.key.as_deref(), Some("env-key"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let config = ClientConfig {
            key: Some(String::new()),
            ..Default::default()
        };
        let creds = Credentials::resolve_with(&config, |_| Some(String::new()));
        assert_eq!(creds, Credentials::default());
    }

    #[test]
    fn test_required_headers() {
        let config = ClientConfig {
            advisory_name: "layout-script".to_string(),
            library_version: "rust 9.9.9".to_string(),
            ..Default::default()
        };
        let handshake = Handshake {
            library_version: config.library_version.clone(),
            advisory_name: config.advisory_name.clone(),
            credentials: Credentials::resolve_with(&config, no_env),
        };
        let headers = handshake.headers();

        assert_eq!(header(&headers, "origin"), Some("ws://localhost/"));
        assert_eq!(header(&headers, "sec-websocket-protocol"), Some("api.iterm2.com"));
        assert_eq!(header(&headers, "x-iterm2-library-version"), Some("rust 9.9.9"));
        assert_eq!(header(&headers, "x-iterm2-advisory-name"), Some("layout-script"));
        assert_eq!(header(&headers, "x-iterm2-disable-auth-ui"), Some("false"));
        assert!(header(&headers, "x-iterm2-cookie").is_none());
        assert!(header(&headers, "x-iterm2-key").is_none());
    }

    #[test]
    fn test_secret_headers_when_present() {
        let handshake = Handshake {
            library_version: "v".to_string(),
            advisory_name: "n".to_string(),
            credentials: Credentials {
                cookie: Some("abc".to_string()),
                key: Some("def".to_string()),
            },
        };
        let headers = handshake.headers();
        assert_eq!(header(&headers, "x-iterm2-cookie"), Some("abc"));
        assert_eq!(header(&headers, "x-iterm2-key"), Some("def"));
        assert!(headers.iter().all(|(name, _)| *name == name.to_lowercase()));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let creds = Credentials {
            cookie: Some("hunter2".to_string()),
            key: None,
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
    }
}
