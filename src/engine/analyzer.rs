//! Market-condition gate.
//!
//! Keeps a rolling price window and answers one question per tick: is
//! this market worth trading right now, and under which regime. The
//! rejection order is fixed: sample count, volatility bounds, whipsaw
//! instability, then trend strength.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

use crate::domain::{MarketAssessment, MarketRegime};

const WINDOW: usize = 100;
const MIN_SAMPLES: usize = 20;

/// Relative range above this is too choppy to price a short contract.
const VOLATILITY_MAX: f64 = 0.008;
/// Relative range below this means the market is not moving at all.
const VOLATILITY_MIN: f64 = 0.00005;
/// Minimum multi-SMA displacement to call the direction meaningful.
const TREND_MIN: f64 = 0.0001;
/// Mean per-tick relative change above this is whipsaw.
const MEAN_CHANGE_MAX: f64 = 0.008;
/// Fraction of direction reversals above this is whipsaw.
const FLIP_RATIO_MAX: f64 = 0.85;

const SMA_SHORT: usize = 10;
const SMA_LONG: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct AnalyzerMetrics {
    pub samples: usize,
    pub volatility: f64,
    pub trend_strength: f64,
}

#[derive(Default)]
pub struct MarketAnalyzer {
    window: Mutex<VecDeque<f64>>,
}

impl MarketAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one price and assess the current conditions.
    pub fn observe(&self, price: f64) -> MarketAssessment {
        let mut window = self.window.lock();
        if window.len() == WINDOW {
            window.pop_front();
        }
        window.push_back(price);

        if window.len() < MIN_SAMPLES {
            // Still warming up; trading is allowed so the engine does
            // not sit idle, but strategies see little history anyway.
            return MarketAssessment {
                tradable: true,
                regime: MarketRegime::DataCollecting,
                reason: "collecting samples",
                volatility: 0.0,
                trend_strength: 0.0,
            };
        }

        let prices: Vec<f64> = window.iter().copied().collect();
        drop(window);

        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let max = prices.iter().copied().fold(f64::MIN, f64::max);
        let min = prices.iter().copied().fold(f64::MAX, f64::min);
        let volatility = if mean != 0.0 { (max - min) / mean } else { 0.0 };
        let trend_strength = Self::trend_strength(&prices);

        let assessment = |tradable, regime, reason| MarketAssessment {
            tradable,
            regime,
            reason,
            volatility,
            trend_strength,
        };

        if volatility > VOLATILITY_MAX {
            debug!(volatility, "market rejected: volatile");
            return assessment(false, MarketRegime::Volatile, "volatility above bound");
        }
        if volatility < VOLATILITY_MIN {
            return assessment(false, MarketRegime::Flat, "market not moving");
        }

        let (mean_change, flip_ratio) = Self::stability(&prices);
        if mean_change > MEAN_CHANGE_MAX || flip_ratio > FLIP_RATIO_MAX {
            debug!(mean_change, flip_ratio, "market rejected: whipsaw");
            return assessment(false, MarketRegime::Volatile, "whipsaw conditions");
        }

        if trend_strength < TREND_MIN {
            return assessment(false, MarketRegime::Ranging, "trend too weak");
        }
        if trend_strength >= 2.0 * TREND_MIN {
            assessment(true, MarketRegime::Trending, "trending")
        } else {
            assessment(true, MarketRegime::Ranging, "ranging")
        }
    }

    pub fn metrics(&self) -> AnalyzerMetrics {
        let window = self.window.lock();
        if window.len() < 2 {
            return AnalyzerMetrics {
                samples: window.len(),
                ..AnalyzerMetrics::default()
            };
        }
        let prices: Vec<f64> = window.iter().copied().collect();
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let max = prices.iter().copied().fold(f64::MIN, f64::max);
        let min = prices.iter().copied().fold(f64::MAX, f64::min);
        AnalyzerMetrics {
            samples: prices.len(),
            volatility: if mean != 0.0 { (max - min) / mean } else { 0.0 },
            trend_strength: Self::trend_strength(&prices),
        }
    }

    pub fn reset(&self) {
        self.window.lock().clear();
    }

    /// Displacement between the short and long moving averages,
    /// relative to the long one.
    fn trend_strength(prices: &[f64]) -> f64 {
        let sma = |n: usize| -> f64 {
            let n = n.min(prices.len());
            prices[prices.len() - n..].iter().sum::<f64>() / n as f64
        };
        let long = sma(SMA_LONG);
        if long == 0.0 {
            return 0.0;
        }
        ((sma(SMA_SHORT) - long) / long).abs()
    }

    /// Mean relative tick-to-tick change and the fraction of direction
    /// reversals.
    fn stability(prices: &[f64]) -> (f64, f64) {
        let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let mean_change = deltas
            .iter()
            .zip(prices)
            .map(|(d, p)| if *p != 0.0 { (d / p).abs() } else { 0.0 })
            .sum::<f64>()
            / deltas.len().max(1) as f64;
        let flips = deltas
            .windows(2)
            .filter(|w| w[0] != 0.0 && w[1] != 0.0 && w[0].signum() != w[1].signum())
            .count();
        let flip_ratio = flips as f64 / (deltas.len().saturating_sub(1)).max(1) as f64;
        (mean_change, flip_ratio)
    }
}
