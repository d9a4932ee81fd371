use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;
use crate::error::{ChatError, Result};
use super::file_service::get_app_data_dir;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RECORDING_SECS: u64 = 25;

static DEFAULT_URL: Lazy<Url> =
    Lazy::new(|| Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"));

/// Overrides the configured base URL, mainly for pointing a dev build at
/// another backend.
pub const BASE_URL_ENV: &str = "DOCCHAT_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_recording_secs: Option<u64>,
}

/// Config with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub max_recording: Duration,
}

impl Config {
    pub fn resolve(&self, env_base_url: Option<&str>) -> Result<EffectiveConfig> {
        let raw = env_base_url
            .filter(|s| !s.trim().is_empty())
            .or(self.base_url.as_deref().filter(|s| !s.trim().is_empty()))
            .unwrap_or(DEFAULT_BASE_URL);

        Ok(self.with_base_url(parse_base_url(raw)?))
    }

    /// Like `resolve`, but a bad base URL falls back to the default one.
    /// The problem is handed back so it can be shown to the user.
    pub fn resolve_or_default(
        &self,
        env_base_url: Option<&str>,
    ) -> (EffectiveConfig, Option<ChatError>) {
        match self.resolve(env_base_url) {
            Ok(effective) => (effective, None),
            Err(e) => {
                warn!("{}; using {}", e, DEFAULT_BASE_URL);
                (self.with_base_url(DEFAULT_URL.clone()), Some(e))
            }
        }
    }

    fn with_base_url(&self, base_url: Url) -> EffectiveConfig {
        EffectiveConfig {
            base_url,
            request_timeout: Duration::from_secs(
                self.request_timeout_secs
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            max_recording: Duration::from_secs(
                self.max_recording_secs
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_MAX_RECORDING_SECS),
            ),
        }
    }
}

pub fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ChatError::Config(format!("Invalid base URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ChatError::Config(format!("Unsupported URL scheme '{}'", other))),
    }
}

fn get_config_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)))
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn get_base_url() -> Result<Option<String>> {
    let config = load_config()?;
    Ok(config.base_url)
}

pub fn set_base_url(url: &str) -> Result<()> {
    parse_base_url(url)?;
    let mut config = load_config().unwrap_or_default();
    config.base_url = Some(url.trim().to_string());
    save_config(&config)
}

/// Reads the config at `path` without ever failing: an unreadable file
/// counts as empty and a bad URL falls back to the default. The first
/// problem met is returned alongside.
pub fn effective_config_from(
    path: &Path,
    env_base_url: Option<&str>,
) -> (EffectiveConfig, Option<ChatError>) {
    let (config, load_problem) = match load_config_from(path) {
        Ok(config) => (config, None),
        Err(e) => {
            warn!("Ignoring unreadable config {}: {}", path.display(), e);
            (Config::default(), Some(e))
        }
    };
    let (effective, url_problem) = config.resolve_or_default(env_base_url);
    (effective, load_problem.or(url_problem))
}

pub fn get_effective_config() -> (EffectiveConfig, Option<ChatError>) {
    let env = std::env::var(BASE_URL_ENV).ok();
    match get_config_path() {
        Ok(path) => effective_config_from(&path, env.as_deref()),
        Err(e) => {
            warn!("No config location: {}", e);
            let (effective, url_problem) = Config::default().resolve_or_default(env.as_deref());
            (effective, url_problem.or(Some(e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_when_unset() {
        let effective = Config::default().resolve(None).unwrap();
        assert_eq!(effective.base_url.as_str(), "http://localhost:3000/");
        assert_eq!(effective.max_recording, Duration::from_secs(25));
        assert_eq!(effective.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn env_override_wins() {
        let config = Config {
            base_url: Some("http://example.test:8080".to_string()),
            ..Default::default()
        };
        let effective = config.resolve(Some("http://127.0.0.1:9000")).unwrap();
        assert_eq!(effective.base_url.as_str(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let config = Config {
            max_recording_secs: Some(0),
            request_timeout_secs: Some(5),
            ..Default::default()
        };
        let effective = config.resolve(None).unwrap();
        assert_eq!(effective.max_recording, Duration::from_secs(25));
        assert_eq!(effective.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(parse_base_url("ftp://host"), Err(ChatError::Config(_))));
        assert!(matches!(parse_base_url("not a url"), Err(ChatError::Config(_))));
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(load_config_from(&path).unwrap().base_url.is_none());

        let config = Config {
            base_url: Some("http://docs.local".to_string()),
            max_recording_secs: Some(10),
            ..Default::default()
        };
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.base_url.as_deref(), Some("http://docs.local"));
        assert_eq!(loaded.max_recording_secs, Some(10));
    }

    #[test]
    fn bad_env_url_falls_back_to_default() {
        let config = Config {
            max_recording_secs: Some(10),
            ..Default::default()
        };
        assert!(config.resolve(Some("localhost:3000")).is_err());

        let (effective, problem) = config.resolve_or_default(Some("localhost:3000"));
        assert_eq!(effective.base_url.as_str(), "http://localhost:3000/");
        assert_eq!(effective.max_recording, Duration::from_secs(10));
        assert!(matches!(problem, Some(ChatError::Config(_))));
    }

    #[test]
    fn unreadable_config_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"base_url\": ").unwrap();

        let (effective, problem) = effective_config_from(&path, None);
        assert_eq!(effective, Config::default().resolve(None).unwrap());
        assert!(matches!(problem, Some(ChatError::Config(_))));

        let (_, problem) = effective_config_from(&dir.path().join("missing.json"), None);
        assert!(problem.is_none());
    }
}
