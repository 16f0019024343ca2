//! # Configuration Management Module
//!
//! TOML configuration of the `trophyrack` binary.
//!
//! ## Configuration Structure
//!
//! - [`EngineConfig`] - where persisted state and holder seeds live
//! - [`DailyConfig`] - daily rotation size and optional fixed RNG seed
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trophyrack::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Create default configuration
//!     Config::create_default("config.toml").await?;
//!
//!     // Load configuration from file
//!     let config = Config::load("config.toml").await?;
//!     println!("State file: {}", config.state_path().display());
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::daily::DEFAULT_MAX_PER_DAY;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub daily: DailyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the state and seeds files
    pub data_dir: String,
    /// JSON file with the compacted stores, relative to `data_dir`
    pub state_file: String,
    /// JSON holder seeds, relative to `data_dir`
    pub seeds_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyConfig {
    #[serde(default = "default_max_per_day")]
    pub max_per_day: usize,
    /// Fixed seed for reproducible daily picks; entropy when absent
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_max_per_day() -> usize {
    DEFAULT_MAX_PER_DAY
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            max_per_day: DEFAULT_MAX_PER_DAY,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.daily.max_per_day == 0 {
            return Err(anyhow!("daily.max_per_day must be at least 1"));
        }
        for (name, value) in [
            ("engine.data_dir", &self.engine.data_dir),
            ("engine.state_file", &self.engine.state_file),
            ("engine.seeds_file", &self.engine.seeds_file),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{} must not be empty", name));
            }
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        Path::new(&self.engine.data_dir).join(&self.engine.state_file)
    }

    pub fn seeds_path(&self) -> PathBuf {
        Path::new(&self.engine.data_dir).join(&self.engine.seeds_file)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig {
                data_dir: "./data".to_string(),
                state_file: "state.json".to_string(),
                seeds_file: "seeds.json".to_string(),
            },
            daily: DailyConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("trophyrack.log".to_string()),
            },
        }
    }
}
