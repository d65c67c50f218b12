//! Aggregate configuration, loadable from a TOML file or built
//! programmatically.

use crate::broker::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub data_path: String,
    pub format: DataFormat,
    pub symbol: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self { data_path: String::new(), format: DataFormat::Csv, symbol: "EURUSD".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BacktestConfig {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub max_steps: Option<u64>,
    #[serde(default = "default_tick_ms")]
    pub base_tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    100
}

impl BacktestConfig {
    pub fn base_tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.base_tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub enabled: bool,
    pub port: u16,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    pub max_clients: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
    pub buffer_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub enable_metrics: bool,
}

fn default_read_timeout_secs() -> u64 {
    30
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_heartbeat_secs() -> u64 {
    54
}
fn default_client_timeout_secs() -> u64 {
    120
}
fn default_batch_size() -> usize {
    1
}
fn default_flush_interval_ms() -> u64 {
    50
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            max_clients: 100,
            heartbeat_interval_secs: default_heartbeat_secs(),
            client_timeout_secs: default_client_timeout_secs(),
            buffer_size: 256,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            log_level: None,
            log_file: None,
            enable_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub market: MarketConfig,
    pub broker: BrokerConfig,
    pub backtest: BacktestConfig,
    pub stream: StreamConfig,
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| ConfigError(format!("parsing {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.initial_balance <= 0.0 {
            return Err(ConfigError("broker.initial_balance must be positive".into()));
        }
        if self.broker.spread < 0.0 {
            return Err(ConfigError("broker.spread must be non-negative".into()));
        }
        if self.broker.leverage <= 0.0 {
            return Err(ConfigError("broker.leverage must be positive".into()));
        }
        if matches!(self.market.format, DataFormat::Json) {
            return Err(ConfigError(
                "json data format has no bundled provider; supply one programmatically".into(),
            ));
        }
        Ok(())
    }
}
