//! RSI momentum with MACD confirmation.

use serde_json::json;
use std::collections::VecDeque;

use crate::domain::{Side, Signal, Tick};
use crate::indicators::{macd_line, rsi};
use crate::strategy::Strategy;

const HISTORY: usize = 60;
const RSI_PERIOD: usize = 14;
const RSI_RISE: f64 = 55.0;
const RSI_FALL: f64 = 45.0;

pub struct Momentum {
    prices: VecDeque<f64>,
}

impl Momentum {
    pub fn new() -> Self {
        Self {
            prices: VecDeque::with_capacity(HISTORY),
        }
    }
}

impl Default for Momentum {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn on_tick(&mut self, tick: &Tick) -> Option<Signal> {
        if self.prices.len() == HISTORY {
            self.prices.pop_front();
        }
        self.prices.push_back(tick.quote);

        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let rsi = rsi(&prices, RSI_PERIOD)?;
        let macd = macd_line(&prices)?;

        // Both indicators must agree on the direction.
        let side = if rsi >= RSI_RISE && macd > 0.0 {
            Side::Rise
        } else if rsi <= RSI_FALL && macd < 0.0 {
            Side::Fall
        } else {
            return None;
        };

        let score = (0.5 + (rsi - 50.0).abs() / 100.0).min(0.95);
        Some(
            Signal::new(side, score, self.name())
                .with_meta(json!({ "rsi": rsi, "macd": macd })),
        )
    }
}
