//! Layered configuration: defaults, optional `config.toml`, then `STT__*`
//! environment variables (e.g. `STT__BINANCE__API_KEY`).

use anyhow::{ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub testnet: bool,
    /// Candle interval used for scanning and exit streams.
    #[serde(default = "default_interval")]
    pub default_interval: String,
    /// Deadline applied to every REST call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// REST base URL override, mainly for tests.
    #[serde(default)]
    pub api_base: Option<String>,
    /// WebSocket base URL override, mainly for tests.
    #[serde(default)]
    pub ws_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Quote notional committed per entry order.
    #[serde(default = "default_unit_notional")]
    pub unit_notional: Decimal,
    /// Fraction of the free quote balance a round may spend.
    #[serde(default = "default_buy_budget_pct")]
    pub buy_budget_pct: Decimal,
    #[serde(default = "default_max_pairs_per_round")]
    pub max_pairs_per_round: usize,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
    /// Candle window for entry evaluation.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    /// Candle window for exit evaluation.
    #[serde(default = "default_exit_candle_limit")]
    pub exit_candle_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_interval_secs")]
    pub interval_secs: u64,
    /// Run the first scan immediately instead of waiting one full interval.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_unit_notional() -> Decimal {
    dec!(12)
}

fn default_buy_budget_pct() -> Decimal {
    dec!(0.9)
}

fn default_max_pairs_per_round() -> usize {
    30
}

fn default_concurrent_requests() -> usize {
    5
}

fn default_candle_limit() -> u32 {
    200
}

fn default_exit_candle_limit() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

fn default_scan_interval_secs() -> u64 {
    3600
}

fn default_db_path() -> String {
    "data/trades.db".to_string()
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            default_interval: default_interval(),
            request_timeout_secs: default_request_timeout_secs(),
            api_base: None,
            ws_base: None,
        }
    }
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            quote_asset: default_quote_asset(),
            unit_notional: default_unit_notional(),
            buy_budget_pct: default_buy_budget_pct(),
            max_pairs_per_round: default_max_pairs_per_round(),
            concurrent_requests: default_concurrent_requests(),
            candle_limit: default_candle_limit(),
            exit_candle_limit: default_exit_candle_limit(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_scan_interval_secs(),
            run_on_start: default_true(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl BinanceConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("STT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("building configuration")?;

        let cfg: Config = settings
            .try_deserialize()
            .context("deserializing configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.trade.buy_budget_pct > Decimal::ZERO && self.trade.buy_budget_pct <= Decimal::ONE,
            "trade.buy_budget_pct must be in (0, 1], got {}",
            self.trade.buy_budget_pct
        );
        ensure!(
            self.trade.unit_notional > Decimal::ZERO,
            "trade.unit_notional must be positive, got {}",
            self.trade.unit_notional
        );
        ensure!(
            self.trade.concurrent_requests >= 1,
            "trade.concurrent_requests must be at least 1"
        );
        ensure!(
            self.trade.candle_limit > 0 && self.trade.exit_candle_limit > 0,
            "candle limits must be positive"
        );
        ensure!(
            self.binance.request_timeout_secs > 0,
            "binance.request_timeout_secs must be positive"
        );
        ensure!(
            self.scheduler.interval_secs > 0,
            "scheduler.interval_secs must be positive"
        );
        Ok(())
    }
}
