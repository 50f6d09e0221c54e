//! Range breakout over a rolling extrema window.

use serde_json::json;
use std::collections::VecDeque;

use crate::domain::{Side, Signal, Tick};
use crate::indicators::rolling_extrema;
use crate::strategy::Strategy;

const HISTORY: usize = 60;
/// Extrema window, excluding the current tick.
const RANGE_WINDOW: usize = 20;
/// Breakout margin relative to the range, scaling the score.
const MARGIN_UNIT: f64 = 0.1;

pub struct Breakout {
    prices: VecDeque<f64>,
}

impl Breakout {
    pub fn new() -> Self {
        Self {
            prices: VecDeque::with_capacity(HISTORY),
        }
    }
}

impl Default for Breakout {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for Breakout {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn on_tick(&mut self, tick: &Tick) -> Option<Signal> {
        // Extrema are computed before the current tick joins the window
        // so a fresh high actually breaks something.
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let extrema = rolling_extrema(&prices, RANGE_WINDOW);

        if self.prices.len() == HISTORY {
            self.prices.pop_front();
        }
        self.prices.push_back(tick.quote);

        let (low, high) = extrema?;
        let range = high - low;
        if range <= 0.0 {
            return None;
        }

        let (side, margin) = if tick.quote > high {
            (Side::Rise, (tick.quote - high) / range)
        } else if tick.quote < low {
            (Side::Fall, (low - tick.quote) / range)
        } else {
            return None;
        };

        let score = (0.6 + (margin / MARGIN_UNIT) * 0.05).min(0.95);
        Some(
            Signal::new(side, score, self.name())
                .with_meta(json!({ "low": low, "high": high, "margin": margin })),
        )
    }
}
