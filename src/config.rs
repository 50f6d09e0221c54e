//! TOML configuration, validated at load time.
//!
//! The API token is never stored in the config file; it comes from the
//! `RISEFALL_API_TOKEN` environment variable (a `.env` file is honored).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

use crate::error::{ConfigError, Result};

pub const TOKEN_ENV_VAR: &str = "RISEFALL_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub trading: TradingConfig,
    pub consensus: ConsensusConfig,
    pub risk: RiskConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub ws_url: String,
    /// Filled from the environment; a value in the file is a mistake we
    /// tolerate but the env var wins.
    pub api_token: Option<String>,
    pub symbol: String,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub base_stake: Decimal,
    /// Contract duration, in `duration_unit`s ("t" is ticks).
    pub duration: u32,
    pub duration_unit: String,
    /// Enforces the one-trade-in-flight discipline.
    pub min_trade_interval_secs: u64,
    /// Minimum spacing between processed ticks.
    pub tick_throttle_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub min_strength: f64,
    /// Below this relative difference, opposing sides are a stalemate.
    pub conflict_ratio: f64,
    pub max_dispersion: f64,
    pub min_score_ranging: f64,
    pub min_score_trending: f64,
    pub ml_min_confidence: f64,
    /// Classifier must beat the traditional score by this much to override.
    pub ml_margin: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Drawdown from session peak that hard-locks the engine.
    pub max_drawdown_pct: f64,
    /// Fraction of `max_drawdown_pct` at which panic mode engages.
    pub panic_ratio: f64,
    pub panic_cooldown_secs: u64,
    /// Daily loss that stops trading, as a fraction of the
    /// session-start balance.
    pub daily_loss_limit_pct: f64,
    /// Daily profit that locks the day in, same base.
    pub daily_profit_limit_pct: f64,
    /// Auto-expiry for daily-limit locks.
    pub lock_duration_secs: u64,
    pub max_trades_per_hour: u32,
    pub max_open_positions: usize,
    /// Base balance floor, as a fraction of the session-start balance.
    pub balance_floor_pct: f64,
    pub max_consecutive_losses: u32,
    pub loss_cooldown_secs: u64,
    pub win_streak_pause_after: u32,
    pub win_pause_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    /// Assumed payout ratio used to size loss-recovery stakes.
    pub payout_ratio: f64,
    pub max_multiplier: Decimal,
    /// Cap on any single recovery stake, as a fraction of balance.
    pub max_recovery_pct: Decimal,
    pub max_recovery_streak: u32,
    pub martingale_multiplier: Decimal,
    pub martingale_after_streak: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;

        let mut config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;

        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.is_empty() {
                config.connection.api_token = Some(token);
            }
        }

        config.validate()?;

        Ok(config)
    }

    /// Install the global tracing subscriber. `RUST_LOG` wins over the
    /// configured level when set.
    pub fn init_logging(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.logging.level));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        if self.logging.format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.ws_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "connection.ws_url",
            }
            .into());
        }
        if self.connection.symbol.is_empty() {
            return Err(ConfigError::MissingField {
                field: "connection.symbol",
            }
            .into());
        }
        if self.trading.base_stake <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "trading.base_stake",
                reason: "must be positive".into(),
            }
            .into());
        }
        if self.trading.duration == 0 {
            return Err(ConfigError::InvalidValue {
                field: "trading.duration",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        for (field, value) in [
            ("consensus.min_strength", self.consensus.min_strength),
            ("consensus.conflict_ratio", self.consensus.conflict_ratio),
            ("consensus.max_dispersion", self.consensus.max_dispersion),
            ("consensus.min_score_ranging", self.consensus.min_score_ranging),
            (
                "consensus.min_score_trending",
                self.consensus.min_score_trending,
            ),
            ("consensus.ml_min_confidence", self.consensus.ml_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{value} outside [0, 1]"),
                }
                .into());
            }
        }
        if !(0.0..=1.0).contains(&self.risk.max_drawdown_pct) || self.risk.max_drawdown_pct == 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "risk.max_drawdown_pct",
                reason: "must be in (0, 1]".into(),
            }
            .into());
        }
        for (field, value) in [
            ("risk.daily_loss_limit_pct", self.risk.daily_loss_limit_pct),
            (
                "risk.daily_profit_limit_pct",
                self.risk.daily_profit_limit_pct,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) || value == 0.0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{value} outside (0, 1]"),
                }
                .into());
            }
        }
        if !(0.0..=1.0).contains(&self.risk.panic_ratio) {
            return Err(ConfigError::InvalidValue {
                field: "risk.panic_ratio",
                reason: "must be in [0, 1]".into(),
            }
            .into());
        }
        if self.risk.max_open_positions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "risk.max_open_positions",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.recovery.payout_ratio <= 0.0 || self.recovery.payout_ratio > 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "recovery.payout_ratio",
                reason: "must be in (0, 1]".into(),
            }
            .into());
        }
        if self.recovery.max_multiplier < Decimal::ONE {
            return Err(ConfigError::InvalidValue {
                field: "recovery.max_multiplier",
                reason: "must be at least 1".into(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            trading: TradingConfig::default(),
            consensus: ConsensusConfig::default(),
            risk: RiskConfig::default(),
            recovery: RecoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.binaryws.com/websockets/v3?app_id=1089".into(),
            api_token: None,
            symbol: "R_100".into(),
            currency: "USD".into(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_stake: dec!(1.0),
            duration: 5,
            duration_unit: "t".into(),
            min_trade_interval_secs: 30,
            tick_throttle_secs: 1,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_strength: 0.6,
            conflict_ratio: 0.30,
            max_dispersion: 0.45,
            min_score_ranging: 0.70,
            min_score_trending: 0.60,
            ml_min_confidence: 0.70,
            ml_margin: 0.05,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 0.20,
            panic_ratio: 0.8,
            panic_cooldown_secs: 1800,
            daily_loss_limit_pct: 0.10,
            daily_profit_limit_pct: 0.20,
            lock_duration_secs: 21600,
            max_trades_per_hour: 12,
            max_open_positions: 1,
            balance_floor_pct: 0.30,
            max_consecutive_losses: 3,
            loss_cooldown_secs: 300,
            win_streak_pause_after: 5,
            win_pause_secs: 60,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            payout_ratio: 0.82,
            max_multiplier: dec!(10.0),
            max_recovery_pct: dec!(0.05),
            max_recovery_streak: 8,
            martingale_multiplier: dec!(1.3),
            martingale_after_streak: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            symbol = "R_50"

            [trading]
            base_stake = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.symbol, "R_50");
        assert_eq!(config.trading.base_stake, dec!(2.5));
        assert_eq!(config.consensus.min_strength, 0.6);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let mut config = Config::default();
        config.consensus.min_strength = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.base_stake = dec!(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.risk.max_drawdown_pct = 0.0;
        assert!(config.validate().is_err());
    }
}
