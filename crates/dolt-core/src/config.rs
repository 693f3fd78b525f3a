//! Engine configuration.
//!
//! Loaded from an optional TOML file, then overridden by `DOLT_*`
//! environment variables:
//!
//! ```toml
//! [store]
//! url = "surrealkv://.dolt/db"
//!
//! [budget]
//! token_budget = 8000
//! runtime_reserve_tokens = 1000
//!
//! [lanes.turn]
//! weight = 0.6
//! min_tokens = 500
//!
//! [logging]
//! json = false
//! level = "info"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lanes::LanePolicyOverrides;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoltConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub lanes: LanePolicyOverrides,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `mem://`, `surrealkv://path`, `ws://host` or `wss://host`.
    /// Unset means: resolve from the SurrealDB environment.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: f64,
    #[serde(default = "default_runtime_reserve")]
    pub runtime_reserve_tokens: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            runtime_reserve_tokens: default_runtime_reserve(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

fn default_token_budget() -> f64 {
    8_000.0
}

fn default_runtime_reserve() -> f64 {
    1_000.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DoltConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse Dolt config")
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// File (when given) then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply environment overrides
    ///
    /// Supported environment variables:
    /// - DOLT_DB_URL: store URL
    /// - DOLT_TOKEN_BUDGET: total token budget
    /// - DOLT_RUNTIME_RESERVE_TOKENS: tokens held back for the runtime
    /// - DOLT_LOG_JSON: emit JSON logs (true/false)
    /// - DOLT_LOG_LEVEL: default log level
    ///
    /// Unparsable numbers are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DOLT_DB_URL") {
            if !url.trim().is_empty() {
                self.store.url = Some(url);
            }
        }

        if let Ok(budget) = std::env::var("DOLT_TOKEN_BUDGET") {
            if let Ok(val) = budget.trim().parse() {
                self.budget.token_budget = val;
            }
        }

        if let Ok(reserve) = std::env::var("DOLT_RUNTIME_RESERVE_TOKENS") {
            if let Ok(val) = reserve.trim().parse() {
                self.budget.runtime_reserve_tokens = val;
            }
        }

        if let Ok(json) = std::env::var("DOLT_LOG_JSON") {
            self.logging.json = json.trim().parse().unwrap_or(self.logging.json);
        }

        if let Ok(level) = std::env::var("DOLT_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}
