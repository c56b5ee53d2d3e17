//! Configuration for walker

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compactor::DEFAULT_KEEP_RECENT;
use crate::cost::{DEFAULT_WARN_AT_PCT, PriceTable, default_price_table, validate_prices};
use crate::error::EngineError;
use crate::router::{RoutingTable, Tier, default_routing_table};
use crate::stuck::StuckThresholds;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Step limits and stuck thresholds
    pub step: StepConfig,

    /// Category to tier routing
    pub routing: RoutingConfig,

    /// Token prices and model ids per tier
    pub pricing: PricingConfig,

    /// Spending caps
    pub budget: BudgetConfig,

    /// Cost ledger location and labels
    pub ledger: LedgerConfig,
}

impl Config {
    /// Load just the log level from config (for early logging setup)
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    /// Load configuration with fallback chain
    ///
    /// 1. Explicit path if provided
    /// 2. ./.walker.yml
    /// 3. ~/.config/walker/walker.yml
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".walker.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("walker").join("walker.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Check every setting the engine relies on
    pub fn validate(&self) -> Result<(), EngineError> {
        debug!("Config::validate: called");
        self.step.stuck.validate()?;
        if self.step.max_actions == 0 {
            return Err(EngineError::config("step.max-actions must be at least 1"));
        }
        if self.step.max_duration_seconds == 0 {
            return Err(EngineError::config("step.max-duration-seconds must be at least 1"));
        }
        if self.step.keep_recent == 0 {
            return Err(EngineError::config("step.keep-recent must be at least 1"));
        }
        if self.step.max_verification_failures == 0 {
            return Err(EngineError::config("step.max-verification-failures must be at least 1"));
        }

        validate_prices(&self.pricing.prices)?;
        let routed = self
            .routing
            .table
            .values()
            .copied()
            .chain(std::iter::once(self.routing.fallback_tier));
        for tier in routed {
            if !self.pricing.prices.contains_key(&tier) {
                return Err(EngineError::config(format!("No price configured for routed tier '{}'", tier)));
            }
        }

        if self.budget.warn_at_pct > 100 {
            return Err(EngineError::config(format!(
                "budget.warn-at-pct must be between 0 and 100, got {}",
                self.budget.warn_at_pct
            )));
        }
        for (name, value) in [
            ("per-run-usd", self.budget.per_run_usd),
            ("per-day-usd", self.budget.per_day_usd),
            ("per-month-usd", self.budget.per_month_usd),
        ] {
            if !value.is_finite() {
                return Err(EngineError::config(format!("budget.{} must be a number", name)));
            }
        }
        Ok(())
    }
}

/// Per-step defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    #[serde(rename = "max-actions")]
    pub max_actions: u32,

    #[serde(rename = "max-duration-seconds")]
    pub max_duration_seconds: u64,

    pub stuck: StuckThresholds,

    /// Raw captures kept in the decision context
    #[serde(rename = "keep-recent")]
    pub keep_recent: usize,

    /// Route every n-th decision as checkpoint verification while checkpoints are unmet (0 disables)
    #[serde(rename = "verify-every")]
    pub verify_every: u32,

    /// Rejected success claims tolerated before a step with success criteria fails
    #[serde(rename = "max-verification-failures")]
    pub max_verification_failures: u32,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            max_actions: default_max_actions(),
            max_duration_seconds: default_max_duration_seconds(),
            stuck: StuckThresholds::default(),
            keep_recent: DEFAULT_KEEP_RECENT,
            verify_every: default_verify_every(),
            max_verification_failures: default_max_verification_failures(),
        }
    }
}

fn default_max_actions() -> u32 {
    debug!("default_max_actions: called");
    30
}

fn default_max_duration_seconds() -> u64 {
    debug!("default_max_duration_seconds: called");
    180
}

fn default_verify_every() -> u32 {
    debug!("default_verify_every: called");
    5
}

fn default_max_verification_failures() -> u32 {
    debug!("default_max_verification_failures: called");
    2
}

/// Routing table and the tier used when a local model fails
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub table: RoutingTable,

    #[serde(rename = "fallback-tier")]
    pub fallback_tier: Tier,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            table: default_routing_table(),
            fallback_tier: Tier::Standard,
        }
    }
}

/// Prices and model identifiers per tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub prices: PriceTable,

    /// Model id behind each tier, for display and for deciders that need it
    pub models: BTreeMap<Tier, String>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            prices: default_price_table(),
            models: default_models(),
        }
    }
}

fn default_models() -> BTreeMap<Tier, String> {
    debug!("default_models: called");
    [
        (Tier::Local, "llava:13b"),
        (Tier::Fast, "claude-haiku-4-5"),
        (Tier::Standard, "claude-sonnet-4-6"),
        (Tier::Strong, "claude-opus-4-6"),
    ]
    .into_iter()
    .map(|(tier, model)| (tier, model.to_string()))
    .collect()
}

/// Spending caps in USD; zero or less means unlimited
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    #[serde(rename = "per-run-usd")]
    pub per_run_usd: f64,

    #[serde(rename = "per-day-usd")]
    pub per_day_usd: f64,

    #[serde(rename = "per-month-usd")]
    pub per_month_usd: f64,

    #[serde(rename = "warn-at-pct")]
    pub warn_at_pct: u8,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_run_usd: default_per_run_usd(),
            per_day_usd: 0.0,
            per_month_usd: 0.0,
            warn_at_pct: DEFAULT_WARN_AT_PCT,
        }
    }
}

fn default_per_run_usd() -> f64 {
    debug!("default_per_run_usd: called");
    10.0
}

/// Where completed runs are recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,

    /// Product label written on each record
    pub product: String,

    /// Level label written on each record (e.g. smoke, full)
    pub level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            product: "default".to_string(),
            level: String::new(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    debug!("default_ledger_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("walker")
        .join(costledger::LEDGER_FILENAME)
}
