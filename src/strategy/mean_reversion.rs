//! Mean reversion against an EMA pair.
//!
//! When the price stretches away from its slow EMA while the fast EMA
//! confirms the stretch, bet on the snap back.

use serde_json::json;
use std::collections::VecDeque;

use crate::domain::{Side, Signal, Tick};
use crate::indicators::ema;
use crate::strategy::Strategy;

const HISTORY: usize = 60;
const EMA_FAST: usize = 5;
const EMA_SLOW: usize = 20;
/// Relative displacement from the slow EMA that counts as stretched.
const DISPLACEMENT_MIN: f64 = 0.0008;

pub struct MeanReversion {
    prices: VecDeque<f64>,
}

impl MeanReversion {
    pub fn new() -> Self {
        Self {
            prices: VecDeque::with_capacity(HISTORY),
        }
    }
}

impl Default for MeanReversion {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn on_tick(&mut self, tick: &Tick) -> Option<Signal> {
        if self.prices.len() == HISTORY {
            self.prices.pop_front();
        }
        self.prices.push_back(tick.quote);

        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let fast = ema(&prices, EMA_FAST)?;
        let slow = ema(&prices, EMA_SLOW)?;
        if slow == 0.0 {
            return None;
        }

        let displacement = (tick.quote - slow) / slow;
        if displacement.abs() < DISPLACEMENT_MIN {
            return None;
        }
        // The fast EMA must be on the same side of the slow one,
        // otherwise the stretch is already unwinding.
        if (displacement > 0.0) != (fast > slow) {
            return None;
        }

        let side = if displacement > 0.0 {
            Side::Fall
        } else {
            Side::Rise
        };
        let score = (0.6 + (displacement.abs() / DISPLACEMENT_MIN - 1.0) * 0.1).min(0.95);
        Some(
            Signal::new(side, score, self.name())
                .with_meta(json!({ "displacement": displacement, "ema_fast": fast, "ema_slow": slow })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(prices: impl IntoIterator<Item = f64>) -> Option<Signal> {
        let mut strategy = MeanReversion::new();
        let mut last = None;
        for (i, quote) in prices.into_iter().enumerate() {
            last = strategy.on_tick(&Tick {
                symbol: "R_100".into(),
                quote,
                epoch: i as i64,
            });
        }
        last
    }

    #[test]
    fn stretched_spike_bets_on_reversion() {
        // Flat base, then a sharp push up.
        let prices = std::iter::repeat(100.0)
            .take(30)
            .chain((1..=5).map(|i| 100.0 + i as f64 * 0.05));
        let signal = run(prices).unwrap();
        assert_eq!(signal.side, Side::Fall);
        assert!(signal.score >= 0.6);
    }

    #[test]
    fn spike_down_bets_on_rise() {
        let prices = std::iter::repeat(100.0)
            .take(30)
            .chain((1..=5).map(|i| 100.0 - i as f64 * 0.05));
        let signal = run(prices).unwrap();
        assert_eq!(signal.side, Side::Rise);
    }

    #[test]
    fn calm_market_stays_quiet() {
        assert!(run(std::iter::repeat(100.0).take(40)).is_none());
    }
}
