//! Client settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/scriptbook/settings.json
//! - Linux: ~/.config/scriptbook/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\scriptbook\settings.json
//!
//! `SCRIPTBOOK_SERVER_URL` and `SCRIPTBOOK_CHANNEL_URL` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

pub const SERVER_URL_ENV: &str = "SCRIPTBOOK_SERVER_URL";
pub const CHANNEL_URL_ENV: &str = "SCRIPTBOOK_CHANNEL_URL";

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_channel_url() -> String {
    "ws://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_execute_timeout() -> u64 {
    30
}

fn default_file_open_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the HTTP endpoints
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Base URL of the push channel; `/ws/{kernel_id}` is appended
    #[serde(default = "default_channel_url")]
    pub channel_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Execute calls run user code and get a longer timeout
    #[serde(default = "default_execute_timeout")]
    pub execute_timeout_secs: u64,

    /// How long to wait for `file_opened` after requesting a file
    #[serde(default = "default_file_open_timeout")]
    pub file_open_timeout_secs: u64,

    /// Local directory that receives a copy of every saved file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            channel_url: default_channel_url(),
            request_timeout_secs: default_request_timeout(),
            execute_timeout_secs: default_execute_timeout(),
            file_open_timeout_secs: default_file_open_timeout(),
            mirror_dir: None,
        }
    }
}

impl Settings {
    pub fn server_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.server_url)?)
    }

    pub fn channel_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.channel_url)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }

    pub fn file_open_timeout(&self) -> Duration {
        Duration::from_secs(self.file_open_timeout_secs)
    }

    /// Check that both URLs parse and use the expected schemes.
    pub fn validate(&self) -> Result<()> {
        let server = self.server_url()?;
        if !matches!(server.scheme(), "http" | "https") {
            anyhow::bail!("server_url must be http(s), got {}", server);
        }
        let channel = self.channel_url()?;
        if !matches!(channel.scheme(), "ws" | "wss") {
            anyhow::bail!("channel_url must be ws(s), got {}", channel);
        }
        for (name, secs) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("execute_timeout_secs", self.execute_timeout_secs),
            ("file_open_timeout_secs", self.file_open_timeout_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{} must be at least 1", name);
            }
        }
        Ok(())
    }

    /// Apply `SCRIPTBOOK_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            self.server_url = url;
        }
        if let Ok(url) = std::env::var(CHANNEL_URL_ENV) {
            self.channel_url = url;
        }
        self
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scriptbook")
        .join("settings.json")
}

/// Load settings from `path`, returning defaults if it is missing or corrupt.
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "[settings] Ignoring invalid settings at {}: {}",
                    path.display(),
                    e
                );
                Settings::default()
            }
        },
        Err(e) => {
            warn!(
                "[settings] Failed to read settings at {}: {}",
                path.display(),
                e
            );
            Settings::default()
        }
    }
}

/// Load settings from the default location with environment overrides.
pub fn load_settings() -> Settings {
    load_settings_from(&settings_path()).with_env_overrides()
}

/// Save settings to `path`, creating parent directories as needed.
pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

/// Save settings to disk
pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(settings, &settings_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server_url, "http://localhost:8000");
        assert_eq!(settings.channel_url, "ws://localhost:8000");
        assert_eq!(settings.request_timeout(), Duration::from_secs(10));
        assert_eq!(settings.execute_timeout(), Duration::from_secs(30));
        assert!(settings.mirror_dir.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_file() {
        let parsed: Settings =
            serde_json::from_str(r#"{"server_url": "http://10.0.0.5:9000"}"#).unwrap();
        assert_eq!(parsed.server_url, "http://10.0.0.5:9000");
        assert_eq!(parsed.channel_url, "ws://localhost:8000");
        assert_eq!(parsed.execute_timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_wrong_schemes() {
        let settings = Settings {
            channel_url: "http://localhost:8000".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        let settings = Settings {
            server_url: "not a url".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let zeroed = [
            Settings {
                request_timeout_secs: 0,
                ..Settings::default()
            },
            Settings {
                execute_timeout_secs: 0,
                ..Settings::default()
            },
            Settings {
                file_open_timeout_secs: 0,
                ..Settings::default()
            },
        ];
        for settings in zeroed {
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains("must be at least 1"));
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            mirror_dir: Some(dir.path().join("src")),
            file_open_timeout_secs: 2,
            ..Settings::default()
        };

        save_settings_to(&settings, &path).unwrap();
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn test_load_missing_or_corrupt_returns_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(load_settings_from(&path), Settings::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings_from(&path), Settings::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(SERVER_URL_ENV, "http://example.test:1234");
        std::env::remove_var(CHANNEL_URL_ENV);

        let settings = Settings::default().with_env_overrides();

        std::env::remove_var(SERVER_URL_ENV);
        assert_eq!(settings.server_url, "http://example.test:1234");
        assert_eq!(settings.channel_url, "ws://localhost:8000");
    }

    #[test]
    fn test_settings_path_is_valid() {
        let path = settings_path();
        assert!(path.ends_with("scriptbook/settings.json"));
    }
}
