use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "tempmail";
const CONFIG_FILE: &str = "config.toml";
const ADDRESS_FILE: &str = "address.json";

/// Overrides `api_url` from the config file when set
pub const API_URL_ENV: &str = "TEMPMAIL_API_URL";

/// Client settings, read from `config.toml` in the config directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the temp-mail API
    pub api_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Same as passing --debug
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            poll_interval_secs: 30,
            request_timeout_secs: 15,
            debug: false,
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Parses a config file body; missing keys take their defaults
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Reads `path`, falling back to defaults when the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::parse(&content)
    }

    /// Applies an API URL override, ignoring blank values
    fn with_api_url(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        self
    }
}

/// Returns the configuration directory path
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .context("Failed to determine config directory")
}

/// Returns the path to the config file
pub fn config_path() -> Result<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Returns the path the active address is persisted to
pub fn address_path() -> Result<PathBuf> {
    config_dir().map(|p| p.join(ADDRESS_FILE))
}

/// Ensures the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir()?;
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create config directory")?;
    }
    Ok(dir)
}

/// Loads the config file plus environment overrides
pub fn load() -> Result<Config> {
    let config = Config::load_from(&config_path()?)?;
    Ok(config.with_api_url(std::env::var(API_URL_ENV).ok()))
}
