//! Core domain vocabulary, independent of the broker wire format.
//!
//! Everything in here speaks RISE/FALL; the CALL/PUT contract vocabulary
//! exists only at the protocol boundary (see [`Side::to_contract_type`]).

mod market;
mod position;
mod signal;
mod trade;

pub use market::{MarketAssessment, MarketRegime, Tick};
pub use position::{Position, PositionStatus};
pub use signal::{Decision, DecisionMethod, Signal};
pub use trade::{ContractType, Side, Trade, TradeStatus};
