//! Environment-backed runtime configuration for `chat-terminal`.

use std::{env, path::PathBuf};

use backend_core::BackendError;
use backend_rest::{ConfigError, EndpointConfig};
use backend_stomp::{ChatSessionConfig, DEFAULT_MESSAGE_LOG_MAX};
use url::Url;

const DEFAULT_DATA_DIR: &str = "./.boardchat-terminal-store";
const CREDENTIALS_FILENAME: &str = "credentials.json";
const DEFAULT_ROOM_ID: i64 = 1;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Runtime configuration used by the terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    pub endpoints: EndpointConfig,
    pub room_id: i64,
    /// Join the public demo room without credentials.
    pub demo: bool,
    pub data_dir: PathBuf,
    /// Optional login used when no stored access token exists.
    pub email: Option<String>,
    pub password: Option<String>,
    pub message_log_max: usize,
    pub max_reconnect_attempts: u32,
}

impl TerminalConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let endpoints = EndpointConfig::from_lookup(&mut lookup)?;
        let room_id = parse_or("BOARDCHAT_ROOM_ID", DEFAULT_ROOM_ID, &mut lookup)?;
        let demo = parse_flag("BOARDCHAT_DEMO", &mut lookup)?;
        let data_dir = optional_trimmed_env("BOARDCHAT_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let email = optional_trimmed_env("BOARDCHAT_EMAIL", &mut lookup);
        let password = lookup("BOARDCHAT_PASSWORD").filter(|value| !value.is_empty());
        let message_log_max = parse_or(
            "BOARDCHAT_MESSAGE_LOG_MAX",
            DEFAULT_MESSAGE_LOG_MAX,
            &mut lookup,
        )?;
        let max_reconnect_attempts = parse_or(
            "BOARDCHAT_MAX_RECONNECT_ATTEMPTS",
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
            &mut lookup,
        )?;

        if room_id <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "BOARDCHAT_ROOM_ID",
                value: room_id.to_string(),
                reason: "must be a positive room id".to_owned(),
            });
        }
        if message_log_max == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BOARDCHAT_MESSAGE_LOG_MAX",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            endpoints,
            room_id,
            demo,
            data_dir,
            email,
            password,
            message_log_max,
            max_reconnect_attempts,
        })
    }

    /// File holding the persisted credential pair.
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILENAME)
    }

    /// Both login fields, when configured.
    pub fn login(&self) -> Option<(&str, &str)> {
        Some((self.email.as_deref()?, self.password.as_deref()?))
    }

    /// The demo room lives on its own socket endpoint.
    pub fn socket_url(&self) -> Result<Url, BackendError> {
        if self.demo {
            self.endpoints.demo_connect_url()
        } else {
            self.endpoints.connect_url()
        }
    }

    pub fn session_config(&self) -> ChatSessionConfig {
        let base = if self.demo {
            ChatSessionConfig::demo()
        } else {
            ChatSessionConfig::for_room(self.room_id)
        };
        ChatSessionConfig {
            message_log_max: self.message_log_max,
            ..base
                .with_host(self.endpoints.credential_scope())
                .with_max_reconnect_attempts(self.max_reconnect_attempts)
        }
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_flag<F>(key: &'static str, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, path::Path};

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<TerminalConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        TerminalConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config_from_pairs(&[]).expect("config should parse");

        assert_eq!(cfg.endpoints.base_url().as_str(), "http://localhost:8080/");
        assert_eq!(cfg.room_id, 1);
        assert!(!cfg.demo);
        assert_eq!(cfg.login(), None);
        assert_eq!(cfg.message_log_max, DEFAULT_MESSAGE_LOG_MAX);
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(
            cfg.credentials_path(),
            Path::new("./.boardchat-terminal-store/credentials.json")
        );
    }

    #[test]
    fn session_config_follows_room_and_server() {
        let cfg = config_from_pairs(&[
            ("BOARDCHAT_API_BASE_URL", "https://chat.example.com:8443"),
            ("BOARDCHAT_ROOM_ID", "42"),
            ("BOARDCHAT_MAX_RECONNECT_ATTEMPTS", "3"),
            ("BOARDCHAT_MESSAGE_LOG_MAX", "50"),
            ("BOARDCHAT_EMAIL", " a@example.com "),
            ("BOARDCHAT_PASSWORD", "pw"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.login(), Some(("a@example.com", "pw")));
        let session = cfg.session_config();
        assert_eq!(session.room_id, 42);
        assert_eq!(session.host, "chat.example.com:8443");
        assert_eq!(session.max_reconnect_attempts, 3);
        assert_eq!(session.message_log_max, 50);
        assert!(!session.demo_mode);
        assert_eq!(
            cfg.socket_url().expect("url").as_str(),
            "https://chat.example.com:8443/api/connect"
        );
    }

    #[test]
    fn demo_flag_selects_demo_room() {
        let cfg = config_from_pairs(&[("BOARDCHAT_DEMO", "yes"), ("BOARDCHAT_ROOM_ID", "9")])
            .expect("config should parse");
        let session = cfg.session_config();
        assert!(session.demo_mode);
        assert_eq!(session.room_id, 1);
        assert_eq!(
            cfg.socket_url().expect("url").as_str(),
            "http://localhost:8080/connect"
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let err = config_from_pairs(&[("BOARDCHAT_ROOM_ID", "abc")])
            .expect_err("non-numeric room should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "BOARDCHAT_ROOM_ID",
                ..
            }
        ));

        let err = config_from_pairs(&[("BOARDCHAT_MESSAGE_LOG_MAX", "0")])
            .expect_err("zero log size should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "BOARDCHAT_MESSAGE_LOG_MAX",
                ..
            }
        ));

        let err = config_from_pairs(&[("BOARDCHAT_DEMO", "maybe")])
            .expect_err("unknown flag should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "BOARDCHAT_DEMO",
                ..
            }
        ));
    }
}
