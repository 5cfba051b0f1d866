//! Client configuration
//!
//! Holds what the hosting page used to inject as globals: the host the
//! realtime endpoints live on, whether the page is served securely, the
//! current user, the session cookie used for the WebSocket handshake and the
//! CSRF token the upload endpoint wants.
//!
//! Sources, later ones win:
//! - built-in defaults
//! - TOML file (`CHATLINE_CONFIG`, else `<config dir>/chatline/config.toml`)
//! - environment variables (`CHATLINE_*`)

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

// ============================================================================
// TOPICS
// ============================================================================

/// Server-side topic a channel is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Chat conversation
    Chat(String),
    /// Voice call room
    Voice(String),
    /// Presence feed of the current user
    Status,
}

impl Topic {
    /// Path below `/ws/`, always with a trailing slash
    pub fn path(&self) -> String {
        match self {
            Topic::Chat(id) => format!("chat/{}/", id),
            Topic::Voice(id) => format!("voice/{}/", id),
            Topic::Status => "status/".to_string(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Chat(id) => write!(f, "chat:{}", id),
            Topic::Voice(id) => write!(f, "voice:{}", id),
            Topic::Status => write!(f, "status"),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Reconnect timing for channels that reconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Fixed delay before each reconnect attempt
    #[serde(default = "default_reconnect_delay")]
    pub delay_ms: u64,

    /// Give up after this many consecutive failed attempts. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay(),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host (with optional port) serving the `/ws/` endpoints
    #[serde(default = "default_host")]
    pub host: String,

    /// Use `wss://` instead of `ws://`
    #[serde(default)]
    pub secure: bool,

    /// Id of the logged-in user, used to mark own messages
    #[serde(default)]
    pub current_user_id: Option<i64>,

    /// Value of the `sessionid` cookie sent with the handshake
    #[serde(default)]
    pub session_cookie: Option<String>,

    /// Value of the `csrftoken` cookie, echoed as `X-CSRFToken` on uploads
    #[serde(default)]
    pub csrf_token: Option<String>,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// STUN/TURN URLs for call peer connections
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_reconnect_delay() -> u64 {
    5_000
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            secure: false,
            current_user_id: None,
            session_cookie: None,
            csrf_token: None,
            reconnect: ReconnectConfig::default(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl ClientConfig {
    /// Loads defaults, the config file (if any) and environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("CHATLINE_CONFIG")
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `CHATLINE_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CHATLINE_HOST") {
            self.host = host;
        }
        if let Some(value) = lookup("CHATLINE_SECURE") {
            self.secure = match value.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "CHATLINE_SECURE",
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("CHATLINE_USER_ID") {
            let id = value.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "CHATLINE_USER_ID",
                value: value.clone(),
            })?;
            self.current_user_id = Some(id);
        }
        if let Some(session) = lookup("CHATLINE_SESSION") {
            self.session_cookie = Some(session);
        }
        if let Some(token) = lookup("CHATLINE_CSRF") {
            self.csrf_token = Some(token);
        }
        Ok(())
    }

    /// Endpoint URL for a topic: `<ws|wss>://<host>/ws/<topic>/<id>/`
    pub fn ws_url(&self, topic: &Topic) -> Result<Url, ConfigError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let url = Url::parse(&format!("{}://{}/ws/{}", scheme, self.host, topic.path()))?;
        Ok(url)
    }

    /// Plain HTTP URL on the same host: `<http|https>://<host>/<path>`
    pub fn http_url(&self, path: &str) -> Result<Url, ConfigError> {
        let scheme = if self.secure { "https" } else { "http" };
        let url = Url::parse(&format!("{}://{}/{}", scheme, self.host, path.trim_start_matches('/')))?;
        Ok(url)
    }

    /// `Cookie` header value with the session and CSRF cookies, if any is set
    pub fn cookie_header(&self) -> Option<String> {
        let cookies: Vec<String> = [("sessionid", &self.session_cookie), ("csrftoken", &self.csrf_token)]
            .into_iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}={}", name, v)))
            .collect();
        (!cookies.is_empty()).then(|| cookies.join("; "))
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "chatline").map(|dirs| dirs.config_dir().join("config.toml"))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_ws_url_schemes() {
        let mut config = ClientConfig {
            host: "chat.example.org".to_string(),
            ..Default::default()
        };

        let url = config.ws_url(&Topic::Chat("42".to_string())).unwrap();
        assert_eq!(url.as_str(), "ws://chat.example.org/ws/chat/42/");

        config.secure = true;
        let url = config.ws_url(&Topic::Voice("7".to_string())).unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.org/ws/voice/7/");

        let url = config.ws_url(&Topic::Status).unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.org/ws/status/");
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.reconnect.delay(), Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, None);
        assert_eq!(config.ice_servers.len(), 1);
        assert!(!config.secure);
    }

    #[test]
    fn test_toml_and_env_overrides() {
        let mut config = ClientConfig::from_toml_str(
            r#"
            host = "localhost:9000"
            current_user_id = 3

            [reconnect]
            delay_ms = 250
            max_attempts = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.reconnect.delay_ms, 250);
        assert_eq!(config.reconnect.max_attempts, Some(4));

        let env: HashMap<&str, &str> = [
            ("CHATLINE_SECURE", "true"),
            ("CHATLINE_USER_ID", "11"),
            ("CHATLINE_SESSION", "abc"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(config.secure);
        assert_eq!(config.host, "localhost:9000");
        assert_eq!(config.current_user_id, Some(11));
        assert_eq!(config.cookie_header().as_deref(), Some("sessionid=abc"));
    }

    #[test]
    fn test_upload_url_and_cookies() {
        let mut config = ClientConfig::default();
        assert_eq!(config.cookie_header(), None);

        let url = config.http_url("/chat/upload/4/").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/chat/upload/4/");

        config.secure = true;
        config.csrf_token = Some("tok".to_string());
        assert_eq!(config.http_url("chat/upload/4/").unwrap().scheme(), "https");
        assert_eq!(config.cookie_header().as_deref(), Some("csrftoken=tok"));

        config.session_cookie = Some("abc".to_string());
        assert_eq!(config.cookie_header().as_deref(), Some("sessionid=abc; csrftoken=tok"));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = ClientConfig::default();
        let result = config.apply_env(|key| (key == "CHATLINE_SECURE").then(|| "maybe".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }
}
