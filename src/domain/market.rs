//! Ticks and market-condition assessment types.

use serde::{Deserialize, Serialize};

/// One price update for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub quote: f64,
    pub epoch: i64,
}

/// Market regime classification produced by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
    Flat,
    DataCollecting,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketRegime::Trending => "TRENDING",
            MarketRegime::Ranging => "RANGING",
            MarketRegime::Volatile => "VOLATILE",
            MarketRegime::Flat => "FLAT",
            MarketRegime::DataCollecting => "DATA_COLLECTING",
        };
        write!(f, "{s}")
    }
}

/// Outcome of analyzing one tick: may the pipeline proceed, and why not.
#[derive(Debug, Clone)]
pub struct MarketAssessment {
    pub tradable: bool,
    pub regime: MarketRegime,
    pub reason: &'static str,
    pub volatility: f64,
    pub trend_strength: f64,
}
