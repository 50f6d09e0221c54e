//! Signal generators.
//!
//! Each strategy keeps its own rolling price history and emits at most
//! one signal per tick. The consensus layer treats them as opaque; it
//! only sees the `Signal` they produce.

use crate::domain::{Signal, Tick};

mod breakout;
mod mean_reversion;
mod momentum;

pub use breakout::Breakout;
pub use mean_reversion::MeanReversion;
pub use momentum::Momentum;

pub trait Strategy: Send {
    fn name(&self) -> &'static str;
    fn on_tick(&mut self, tick: &Tick) -> Option<Signal>;
}

/// The default strategy set.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(Momentum::new()),
        Box::new(MeanReversion::new()),
        Box::new(Breakout::new()),
    ]
}
