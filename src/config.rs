use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Channel configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

// ---------------------------------------------------------------------------
// Store config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "~/.remindbot/tasks.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Also write a daily-rolling log file under the config dir.
    #[serde(default)]
    pub file: bool,
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "remindbot=info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: false,
            level: default_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Paths & loading
// ---------------------------------------------------------------------------

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".remindbot")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn log_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Expand a leading `~` in the configured database path.
pub fn database_path(cfg: &Config) -> PathBuf {
    let raw = &cfg.store.database;
    if raw.starts_with('~') {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(raw.trim_start_matches("~/"))
    } else {
        PathBuf::from(raw)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let p = path.map(PathBuf::from).unwrap_or_else(config_path);

    if p.exists() {
        let text = std::fs::read_to_string(&p)
            .with_context(|| format!("reading config from {}", p.display()))?;
        let cfg: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config from {}", p.display()))?;
        Ok(cfg)
    } else {
        Ok(Config::default())
    }
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let p = path.map(PathBuf::from).unwrap_or_else(config_path);

    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    std::fs::write(&p, json)?;
    Ok(())
}
