// Configuration management for the NearPay CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/nearpay/config.json
// - Linux: ~/.config/nearpay/config.json
// - Windows: %APPDATA%\nearpay\config.json

use anyhow::{Context, Result};
use nearpay_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine settings shared by every simulated node
    pub engine: EngineConfig,

    /// Log filter used when RUST_LOG is unset
    pub log_filter: String,

    /// Number of nodes in the loopback demo
    pub demo_nodes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log_filter: "warn".to_string(),
            demo_nodes: 3,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("nearpay");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .engine
                .validate()
                .context("Invalid engine settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Restore defaults and save
    pub fn reset() -> Result<Self> {
        let config = Config::default();
        config.save()?;
        Ok(config)
    }

    /// Set a config value, validate and save
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.engine.validate().context("Rejected setting")?;
        self.save()
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let engine = &mut self.engine;
        match key {
            "device_name" => engine.device_name = value.to_string(),
            "discovery_window_ms" => {
                engine.discovery_window_ms = value.parse().context("Invalid number")?;
            }
            "requested_transfer_unit" => {
                engine.requested_transfer_unit = value.parse().context("Invalid number")?;
            }
            "default_transfer_unit" => {
                engine.default_transfer_unit = value.parse().context("Invalid number")?;
            }
            "attempt_timeout_ms" => {
                engine.attempt_timeout_ms = if value.is_empty() || value == "none" {
                    None
                } else {
                    Some(value.parse().context("Invalid number")?)
                };
            }
            "event_capacity" => {
                engine.event_capacity = value.parse().context("Invalid number")?;
            }
            "currency" => engine.currency = value.to_uppercase(),
            "payee.name" => engine.payee.name = value.to_string(),
            "payee.phone_number" => engine.payee.phone_number = value.to_string(),
            "payee.account_id" => engine.payee.account_id = value.to_string(),
            "log_filter" => self.log_filter = value.to_string(),
            "demo_nodes" => {
                self.demo_nodes = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let engine = &self.engine;
        vec![
            ("device_name".to_string(), engine.device_name.clone()),
            (
                "discovery_window_ms".to_string(),
                engine.discovery_window_ms.to_string(),
            ),
            (
                "requested_transfer_unit".to_string(),
                engine.requested_transfer_unit.to_string(),
            ),
            (
                "default_transfer_unit".to_string(),
                engine.default_transfer_unit.to_string(),
            ),
            (
                "attempt_timeout_ms".to_string(),
                engine
                    .attempt_timeout_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
            ("event_capacity".to_string(), engine.event_capacity.to_string()),
            ("currency".to_string(), engine.currency.clone()),
            ("payee.name".to_string(), engine.payee.name.clone()),
            (
                "payee.phone_number".to_string(),
                engine.payee.phone_number.clone(),
            ),
            ("payee.account_id".to_string(), engine.payee.account_id.clone()),
            ("log_filter".to_string(), self.log_filter.clone()),
            ("demo_nodes".to_string(), self.demo_nodes.to_string()),
        ]
    }
}
