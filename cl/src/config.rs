//! Configuration for costledger

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Default per-day cap in USD (0 = unlimited)
    #[serde(default)]
    pub per_day_usd: f64,

    /// Default per-month cap in USD (0 = unlimited)
    #[serde(default)]
    pub per_month_usd: f64,
}

fn default_ledger_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("costledger")
        .join(crate::LEDGER_FILENAME)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            per_day_usd: 0.0,
            per_month_usd: 0.0,
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("costledger").join("config.yml")),
            Some(PathBuf::from("costledger.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }
}
