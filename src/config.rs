use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const BACKEND_URL_ENV: &str = "FLIGHTCHAT_BACKEND_URL";

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    pub base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: DEFAULT_BACKEND_URL.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Load config from ~/.flightchat/config.toml, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let default_config = Config::default();
            default_config.save_to(config_path)?;
            eprintln!("{}", created_notice(config_path));
            return Ok(default_config);
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;

        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let content_with_header = format!(
            "# Flightchat Configuration\n\
             # base_url points at the log analysis service (e.g., http://YOUR_SERVER:8000)\n\
             # The {} environment variable overrides it\n\
             \n{}",
            BACKEND_URL_ENV, content
        );

        fs::write(config_path, content_with_header)
            .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

        Ok(())
    }

    /// Backend URL after applying the command line flag and environment.
    pub fn backend_url(&self, flag: Option<&str>) -> String {
        let env = std::env::var(BACKEND_URL_ENV).ok();
        resolve_backend_url(flag, env.as_deref(), &self.backend.base_url)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .context("Neither USERPROFILE nor HOME environment variable is set")?;

        Ok(PathBuf::from(home).join(".flightchat").join("config.toml"))
    }
}

fn created_notice(config_path: &Path) -> String {
    format!("Created config file at: {}", config_path.display())
}

fn resolve_backend_url(flag: Option<&str>, env: Option<&str>, file: &str) -> String {
    flag.or(env.filter(|v| !v.trim().is_empty()))
        .unwrap_or(file)
        .trim_end_matches('/')
        .to_string()
}
